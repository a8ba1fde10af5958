//! 匹配引擎集成测试
//!
//! 派发结果必须与逐个目标全量扫描完全一致；条件序列化后重新编译，
//! 在同一批物品上的结果也必须一致。

use league_shared::objectives::{
    Condition, ConditionField, NumberField, Objective, ObjectiveType, Operator, ValidityWindow,
};
use league_shared::stash::Item;
use league_shared::test_utils::{ItemBuilder, TestDataGenerator, ts};
use objective_matcher::{DispatchTable, TimeValidation};

const BASE_TYPES: [&str; 6] = [
    "Chaos Orb",
    "Exalted Orb",
    "Mirror of Kalandra",
    "Vaal Regalia",
    "Leather Belt",
    "Hubris Circlet",
];

fn objective_set() -> Vec<Objective> {
    let mut objectives = vec![
        TestDataGenerator::base_type_objective(1, "Mirror of Kalandra"),
        TestDataGenerator::base_type_objective(2, "Chaos Orb").with_number_field(NumberField::StackSize),
        Objective::new(3, "six link body", ObjectiveType::Item).with_conditions(vec![
            Condition::new(ConditionField::BaseType, Operator::In, "Vaal Regalia,Hubris Circlet"),
            Condition::new(ConditionField::MaxLinks, Operator::Eq, "6"),
        ]),
        Objective::new(4, "headhunter", ObjectiveType::Item).with_conditions(vec![
            Condition::new(ConditionField::Name, Operator::Eq, "Headhunter"),
            Condition::new(ConditionField::Rarity, Operator::Eq, "Unique"),
        ]),
        Objective::new(5, "any accessory", ObjectiveType::Item).with_conditions(vec![
            Condition::new(ConditionField::ItemClass, Operator::Eq, "accessories"),
        ]),
        Objective::new(6, "high ilvl corrupted", ObjectiveType::Item).with_conditions(vec![
            Condition::new(ConditionField::Ilvl, Operator::Gt, "83"),
            Condition::new(ConditionField::IsCorrupted, Operator::Eq, "true"),
        ]),
        Objective::new(7, "shaper or elder", ObjectiveType::Item).with_conditions(vec![
            Condition::new(ConditionField::Influences, Operator::ContainsMatch, "^(shaper|elder)$"),
        ]),
        Objective::new(8, "not currency", ObjectiveType::Item).with_conditions(vec![
            Condition::new(ConditionField::Rarity, Operator::NotIn, "Currency,Gem"),
            Condition::new(ConditionField::ExplicitMods, Operator::LengthGt, "1"),
        ]),
        Objective::new(9, "windowed exalt", ObjectiveType::Item)
            .with_conditions(vec![Condition::new(ConditionField::BaseType, Operator::Eq, "Exalted Orb")])
            .with_window(ValidityWindow::new(Some(ts(0)), Some(ts(3600)))),
    ];
    // 同一桶中的多个目标
    objectives.push(Objective::new(10, "big chaos stack", ObjectiveType::Item).with_conditions(vec![
        Condition::new(ConditionField::BaseType, Operator::Eq, "Chaos Orb"),
        Condition::new(ConditionField::StackSize, Operator::Gt, "10"),
    ]));
    objectives
}

/// 确定性的物品样本
fn corpus() -> Vec<Item> {
    let mut items = Vec::new();
    for i in 0..120i64 {
        let base = BASE_TYPES[(i as usize) % BASE_TYPES.len()];
        let mut builder = ItemBuilder::new(base)
            .id(&format!("item-{i}"))
            .ilvl(60 + i % 30)
            .frame_type(i % 6)
            .stack_size(1 + i % 20);

        if i % 4 == 0 {
            builder = builder.linked_sockets(6);
        }
        if i % 5 == 0 {
            builder = builder.corrupted();
        }
        if i % 7 == 0 {
            builder = builder.name("Headhunter").frame_type(3);
        }
        if i % 3 == 0 {
            builder = builder.item_class("accessories");
        }
        if i % 9 == 0 {
            builder = builder.influence(if i % 2 == 0 { "shaper" } else { "hunter" });
        }
        if i % 2 == 1 {
            builder = builder.explicit_mods(&["+10 to Strength", "+12% to Fire Resistance"]);
        }
        items.push(builder.build());
    }
    items
}

#[test]
fn test_dispatch_equals_full_scan() {
    let table = DispatchTable::build(1, &objective_set());
    assert!(table.skipped().is_empty());

    for validation in [TimeValidation::Disabled, TimeValidation::At(ts(10)), TimeValidation::At(ts(7200))] {
        let mut total = 0;
        for item in corpus() {
            let dispatched = table.check_for_completions(&item, validation);
            let scanned = table.check_by_full_scan(&item, validation);
            assert_eq!(dispatched, scanned, "item {:?}", item.id);
            total += dispatched.len();
        }
        // 样本必须真的命中过
        assert!(total > 0);
    }
}

#[test]
fn test_each_objective_evaluated_once_per_item() {
    let table = DispatchTable::build(1, &objective_set());
    for item in corpus() {
        let completions = table.check_for_completions(&item, TimeValidation::Disabled);
        let mut ids: Vec<_> = completions.iter().map(|c| c.objective_id).collect();
        ids.dedup();
        assert_eq!(ids.len(), completions.len());
    }
}

#[test]
fn test_condition_round_trip() {
    let objectives = objective_set();
    let json = serde_json::to_string(&objectives).unwrap();
    let restored: Vec<Objective> = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, objectives);

    let original = DispatchTable::build(1, &objectives);
    let recompiled = DispatchTable::build(2, &restored);

    for item in corpus() {
        assert_eq!(
            original.check_for_completions(&item, TimeValidation::Disabled),
            recompiled.check_for_completions(&item, TimeValidation::Disabled)
        );
    }
}
