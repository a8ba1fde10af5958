//! 数据库仓储层
//!
//! - 目标、队伍、账号由外部 CRUD 层维护，这里只读
//! - 匹配记录、仓库页观测、游标和同步状态由本服务写入
//! - 需要原子性的写入（同步完成时的替换与状态切换）在仓储内部开启事务

mod cursor_repo;
mod match_repo;
mod objective_repo;
mod traits;

pub use cursor_repo::CursorRepository;
pub use match_repo::MatchRepository;
pub use objective_repo::ObjectiveRepository;
pub use traits::*;
