//! 目标匹配引擎
//!
//! 把目标条件编译成匹配器，按判别字段分桶构建派发表，
//! 对每个物品只评估可能命中的目标。玩家目标按轮询周期对玩家状态求值。

pub mod compiler;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod normalize;
pub mod operators;
pub mod player;

pub use compiler::{CompiledObjective, Discriminator, DiscriminatorField, Matcher, compile_objective};
pub use dispatch::{Completion, DispatchTable, MatchingEngine, ObjectiveChecker, TimeValidation};
pub use error::{MatcherError, Result};
pub use normalize::Normalizer;
pub use player::{PlayerObjectiveChecker, PlayerRegistry, PlayerState};
