//! Whole-fleet scenarios over the in-process bus

use crate::test_utils::{fast_config, req, RunningFleet};
use medfleet_core::{StrategyKind, Task};
use medfleet_nav_bridge::GoalOutcome;
use medfleet_unit_status::UnitStatus;
use std::time::Duration;

const DRAIN: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_dispatched_task_is_delivered_and_removed() {
    let config = fast_config(StrategyKind::DelegationSplit);
    let task = Task::new(
        "task_001",
        req(&[("Type1", 1), ("Type2", 1), ("Type3", 1), ("Type4", 1)]),
        "Room A-101",
    );
    let fleet = RunningFleet::start(&config, vec![task]).await;

    assert!(fleet.wait_until_drained(DRAIN).await, "task was never completed");
    let stopped = fleet.stop().await;

    for kind in ["Type1", "Type2", "Type3", "Type4"] {
        assert_eq!(stopped.fleet_stock(kind), 59);
    }
    // The low-battery unit never takes work
    assert_eq!(stopped.stock("robot2", "Type1"), 20);
    assert!(stopped.dispatcher.as_ref().unwrap().is_finished("task_001"));
    assert!(stopped.nothing_reserved());
}

#[tokio::test]
async fn test_uncoverable_task_is_requeued_untouched() {
    let config = fast_config(StrategyKind::DelegationSplit);
    let original = Task::new("t1", req(&[("Type1", 50)]), "Room A-101");
    let fleet = RunningFleet::start(&config, vec![original.clone()]).await;

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(fleet.source.contains("t1").await);
    let stopped = fleet.stop().await;

    let dispatcher = stopped.dispatcher.as_ref().unwrap();
    let held = dispatcher
        .pending_task("t1")
        .or_else(|| dispatcher.assignment("t1").map(|a| &a.task));
    assert_eq!(held, Some(&original));
    assert!(!dispatcher.is_finished("t1"));
    assert_eq!(stopped.fleet_stock("Type1"), 60);
    assert!(stopped.nothing_reserved());
}

#[tokio::test]
async fn test_task_is_delegated_to_closer_unit() {
    let mut config = fast_config(StrategyKind::DelegationSplit);
    config.units[0].battery = 100;
    config.units[1].battery = 50;
    config.units[2].battery = 90;
    let task = Task::new("t1", req(&[("Type2", 3)]), "Room C-303");
    let fleet = RunningFleet::start(&config, vec![task]).await;

    assert!(fleet.wait_until_drained(DRAIN).await);
    let robot3_goals = fleet.controllers["robot3"].goals();
    let stopped = fleet.stop().await;

    // robot1 is picked for battery, robot3 is nearest to C-303
    assert_eq!(stopped.stock("robot1", "Type2"), 20);
    assert_eq!(stopped.stock("robot2", "Type2"), 20);
    assert_eq!(stopped.stock("robot3", "Type2"), 17);
    assert!(stopped.units["robot3"].has_completed("t1"));
    assert_eq!(robot3_goals.len(), 1);
}

#[tokio::test]
async fn test_task_is_split_across_units() {
    let mut config = fast_config(StrategyKind::DelegationSplit);
    config.units[2].battery = 90;
    let task = Task::new("t1", req(&[("Type1", 30)]), "Room B-202");
    let fleet = RunningFleet::start(&config, vec![task]).await;

    assert!(fleet.wait_until_drained(DRAIN).await);
    let stopped = fleet.stop().await;

    assert_eq!(stopped.stock("robot1", "Type1"), 0);
    assert_eq!(stopped.stock("robot2", "Type1"), 20);
    assert_eq!(stopped.stock("robot3", "Type1"), 10);
    assert!(stopped.units["robot1"].has_completed("t1"));
    assert!(stopped.units["robot3"].has_completed("t1"));
    assert!(stopped.dispatcher.unwrap().is_finished("t1"));
}

#[tokio::test]
async fn test_contract_net_awards_one_bidder() {
    let mut config = fast_config(StrategyKind::ContractNet);
    let mut fourth = config.units[2].clone();
    fourth.id = "robot4".to_string();
    config.units.push(fourth);
    let task = Task::new("t1", req(&[("Type1", 2), ("Type4", 1)]), "Room B-202");
    let fleet = RunningFleet::start(&config, vec![task]).await;

    assert!(fleet.wait_until_drained(DRAIN).await);
    let stopped = fleet.stop().await;

    assert_eq!(stopped.fleet_stock("Type1"), 78);
    assert_eq!(stopped.fleet_stock("Type4"), 79);
    let winners: Vec<&str> = stopped
        .units
        .iter()
        .filter(|(_, u)| u.has_completed("t1"))
        .map(|(id, _)| id.as_str())
        .collect();
    assert_eq!(winners.len(), 1);
    assert_ne!(winners[0], "robot2");
    assert!(stopped.nothing_reserved());
}

#[tokio::test]
async fn test_contract_net_without_bidders_requeues() {
    let mut config = fast_config(StrategyKind::ContractNet);
    config.units.truncate(2);
    // robot2 is below the threshold and refuses every call
    let task = Task::new("t1", req(&[("Type1", 2)]), "Room A-101");
    let fleet = RunningFleet::start(&config, vec![task.clone()]).await;

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let stopped = fleet.stop().await;

    assert_eq!(stopped.fleet_stock("Type1"), 40);
    let dispatcher = stopped.dispatcher.as_ref().unwrap();
    assert!(!dispatcher.is_finished("t1"));
    assert!(dispatcher.pending_task("t1").is_some() || dispatcher.assignment("t1").is_some());
    assert!(stopped.nothing_reserved());
}

#[tokio::test]
async fn test_aborted_drive_still_consumes_stock() {
    let mut config = fast_config(StrategyKind::DelegationSplit);
    config.units[2].battery = 90;
    let task = Task::new("t1", req(&[("Type3", 4)]), "Room A-101");
    let fleet = RunningFleet::start(&config, vec![task]).await;
    fleet.controllers["robot1"].script(GoalOutcome::Aborted);

    assert!(fleet.wait_until_drained(DRAIN).await);
    let stopped = fleet.stop().await;

    assert_eq!(stopped.stock("robot1", "Type3"), 16);
    assert!(stopped.units["robot1"].has_completed("t1"));
}

#[tokio::test]
async fn test_low_battery_unit_recharges_on_tick() {
    let mut config = fast_config(StrategyKind::DelegationSplit);
    config.battery.tick_interval_ms = 100;
    let fleet = RunningFleet::start_units(&config).await;

    tokio::time::sleep(Duration::from_millis(600)).await;
    let station_goals = fleet.controllers["robot2"].goals();
    let stopped = fleet.stop().await;

    let robot2 = &stopped.units["robot2"];
    assert!(!station_goals.is_empty());
    assert_eq!(station_goals[0], config.units[1].charging_station);
    assert_eq!(robot2.status(), UnitStatus::Available);
    assert!(robot2.battery() > 90);
    assert!(stopped.units["robot1"].battery() < 100);
}

#[tokio::test]
async fn test_dispatcher_keeps_task_while_fleet_is_offline() {
    let config = fast_config(StrategyKind::DelegationSplit);
    let task = Task::new("t1", req(&[("Type1", 1)]), "Room A-101");
    let fleet = RunningFleet::start(&config, vec![task]).await;
    for id in config.unit_ids() {
        fleet.bus.unregister(&id).await;
    }

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(fleet.source.contains("t1").await);
    let stopped = fleet.stop().await;

    let dispatcher = stopped.dispatcher.unwrap();
    assert!(dispatcher.pending_task("t1").is_some() || dispatcher.assignment("t1").is_some());
}
