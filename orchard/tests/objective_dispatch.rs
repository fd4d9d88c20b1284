//! Objective scheduling: single dispatch, fan-out, and roadmap write batching.

use std::collections::BTreeMap;

use anyhow::Result;
use orchard::core::roadmap::{NodeStatus, Roadmap};
use orchard::core::selector::UnblockedNode;
use orchard::error::OrchardError;
use orchard::exit_codes;
use orchard::io::dispatch::{Dispatcher, RunReference};
use orchard::io::roadmap_store::{RecordRoadmapStore, RoadmapStore};
use orchard::objective::{DispatchOptions, ObjectiveScheduler};
use orchard::plans::{IssuePlanStore, PlanStore};
use orchard::test_support::{FakeRecords, RecordingDispatcher, objective_body, roadmap, step};

fn options() -> DispatchOptions {
    DispatchOptions {
        dry_run: false,
        model: "sonnet".to_string(),
        labels: Vec::new(),
    }
}

fn domain(err: &anyhow::Error) -> &OrchardError {
    err.downcast_ref::<OrchardError>().expect("domain error")
}

/// `1.1` done with three siblings waiting on it and one step after them.
fn fan_out_roadmap() -> Roadmap {
    roadmap(vec![
        step("1.1", NodeStatus::Done, &[]),
        step("2.1", NodeStatus::Pending, &["1.1"]),
        step("2.2", NodeStatus::Pending, &["1.1"]),
        step("2.3", NodeStatus::Pending, &["1.1"]),
        step("3.1", NodeStatus::Pending, &["2.1", "2.2", "2.3"]),
    ])
}

fn seed(records: &FakeRecords, map: &Roadmap) -> (u64, String) {
    let number = records.insert_issue("Widgets v2", &objective_body(map));
    (number, number.to_string())
}

fn statuses(roadmaps: &impl RoadmapStore, objective: &str) -> Vec<(String, NodeStatus)> {
    roadmaps
        .load(objective)
        .expect("roadmap")
        .roadmap
        .nodes
        .into_iter()
        .map(|n| (n.id, n.status))
        .collect()
}

#[test]
fn fan_out_writes_the_roadmap_once() {
    let records = FakeRecords::new();
    let (number, objective) = seed(&records, &fan_out_roadmap());
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let roadmaps = RecordRoadmapStore::new(&records);
    let dispatcher = RecordingDispatcher::new();

    let report = ObjectiveScheduler::new(&roadmaps, &plans, &dispatcher)
        .dispatch_all_unblocked(&objective, &options())
        .expect("fan-out");

    assert!(!report.is_partial());
    assert!(report.roadmap_written);
    assert_eq!(records.body_writes(number), 1);
    let ids: Vec<&str> = report.dispatched.iter().map(|d| d.node_id.as_str()).collect();
    assert_eq!(ids, vec!["2.1", "2.2", "2.3"]);

    let snapshot = roadmaps.load(&objective).expect("roadmap");
    for dispatched in &report.dispatched {
        let node = snapshot.roadmap.node(&dispatched.node_id).expect("node");
        assert_eq!(node.status, NodeStatus::Planning);
        let plan_id = dispatched.plan_id.as_deref().expect("plan id");
        assert_eq!(node.plan, Some(format!("#{plan_id}")));
        let plan = plans.get(plan_id).expect("plan");
        assert_eq!(
            plan.objective_link(),
            Some((objective.as_str(), dispatched.node_id.as_str()))
        );
    }
    assert_eq!(snapshot.roadmap.node("3.1").expect("3.1").status, NodeStatus::Pending);

    let triggers = dispatcher.triggers();
    assert_eq!(triggers.len(), 3);
    assert_eq!(triggers[0].inputs["node_id"], "2.1");
    assert_eq!(triggers[0].inputs["objective"], objective);
    assert!(triggers[0].instruction.contains("## Step 2.1 (Phase 2)"));
}

#[test]
fn fan_out_collects_trigger_failures() {
    let records = FakeRecords::new();
    let (number, objective) = seed(&records, &fan_out_roadmap());
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let roadmaps = RecordRoadmapStore::new(&records);
    let dispatcher = RecordingDispatcher::failing_for("2.2");

    let report = ObjectiveScheduler::new(&roadmaps, &plans, &dispatcher)
        .dispatch_all_unblocked(&objective, &options())
        .expect("fan-out");

    assert!(report.is_partial());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].node_id, "2.2");
    assert!(report.failures[0].error.contains("rejected"));
    assert_eq!(records.body_writes(number), 1);
    assert_eq!(
        statuses(&roadmaps, &objective)[1..4],
        [
            ("2.1".to_string(), NodeStatus::Planning),
            ("2.2".to_string(), NodeStatus::Pending),
            ("2.3".to_string(), NodeStatus::Planning),
        ]
    );
}

#[test]
fn single_dispatch_takes_the_first_unblocked_step() {
    let records = FakeRecords::new();
    let (_, objective) = seed(&records, &fan_out_roadmap());
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let roadmaps = RecordRoadmapStore::new(&records);
    let dispatcher = RecordingDispatcher::new();
    let scheduler = ObjectiveScheduler::new(&roadmaps, &plans, &dispatcher);

    let first = scheduler.dispatch_one(&objective, None, &options()).expect("first");
    let second = scheduler.dispatch_one(&objective, None, &options()).expect("second");

    assert_eq!(first.dispatched[0].node_id, "2.1");
    assert_eq!(second.dispatched[0].node_id, "2.2");
}

#[test]
fn explicit_node_must_exist_and_be_pending() {
    let records = FakeRecords::new();
    let (_, objective) = seed(&records, &fan_out_roadmap());
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let roadmaps = RecordRoadmapStore::new(&records);
    let dispatcher = RecordingDispatcher::new();
    let scheduler = ObjectiveScheduler::new(&roadmaps, &plans, &dispatcher);

    let done = scheduler
        .dispatch_one(&objective, Some("1.1"), &options())
        .expect_err("done step");
    assert!(matches!(domain(&done), OrchardError::InvalidOption { .. }));

    let missing = scheduler
        .dispatch_one(&objective, Some("9.9"), &options())
        .expect_err("missing step");
    assert!(matches!(domain(&missing), OrchardError::NodeNotFound { .. }));
    assert!(dispatcher.triggers().is_empty());
}

#[test]
fn explicit_blocked_node_is_still_dispatched() {
    let records = FakeRecords::new();
    let (_, objective) = seed(&records, &fan_out_roadmap());
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let roadmaps = RecordRoadmapStore::new(&records);
    let dispatcher = RecordingDispatcher::new();

    let report = ObjectiveScheduler::new(&roadmaps, &plans, &dispatcher)
        .dispatch_one(&objective, Some("3.1"), &options())
        .expect("dispatch");

    assert_eq!(report.dispatched[0].node_id, "3.1");
    assert_eq!(
        roadmaps.load(&objective).expect("roadmap").roadmap.node("3.1").expect("3.1").status,
        NodeStatus::Planning
    );
}

#[test]
fn nothing_unblocked_maps_to_its_own_exit_code() {
    let records = FakeRecords::new();
    let (_, objective) = seed(
        &records,
        &roadmap(vec![
            step("1.1", NodeStatus::InProgress, &[]),
            step("1.2", NodeStatus::Pending, &["1.1"]),
        ]),
    );
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let roadmaps = RecordRoadmapStore::new(&records);
    let dispatcher = RecordingDispatcher::new();

    let err = ObjectiveScheduler::new(&roadmaps, &plans, &dispatcher)
        .dispatch_all_unblocked(&objective, &options())
        .expect_err("nothing to do");

    assert!(matches!(domain(&err), OrchardError::NoUnblockedNodes(_)));
    assert_eq!(exit_codes::for_error(domain(&err)), exit_codes::NOTHING_UNBLOCKED);
}

#[test]
fn dry_run_writes_nothing() {
    let records = FakeRecords::new();
    let (number, objective) = seed(&records, &fan_out_roadmap());
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let roadmaps = RecordRoadmapStore::new(&records);
    let dispatcher = RecordingDispatcher::new();
    let dry = DispatchOptions {
        dry_run: true,
        ..options()
    };

    let report = ObjectiveScheduler::new(&roadmaps, &plans, &dispatcher)
        .dispatch_all_unblocked(&objective, &dry)
        .expect("dry run");

    assert_eq!(report.dispatched.len(), 3);
    assert!(!report.roadmap_written);
    assert!(report.dispatched.iter().all(|d| d.plan_id.is_none()));
    assert!(!report.dispatched[0].instruction.contains("## Plan"));
    assert_eq!(records.body_writes(number), 0);
    assert_eq!(records.record_count(), 1);
    assert!(dispatcher.triggers().is_empty());
}

#[test]
fn model_aliases_are_normalized_and_unknown_models_rejected() {
    let records = FakeRecords::new();
    let (_, objective) = seed(&records, &fan_out_roadmap());
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let roadmaps = RecordRoadmapStore::new(&records);
    let dispatcher = RecordingDispatcher::new();
    let scheduler = ObjectiveScheduler::new(&roadmaps, &plans, &dispatcher);

    let bogus = DispatchOptions {
        model: "gpt".to_string(),
        ..options()
    };
    let err = scheduler.dispatch_one(&objective, None, &bogus).expect_err("bad model");
    assert!(matches!(domain(&err), OrchardError::InvalidOption { .. }));
    assert_eq!(records.record_count(), 1);

    let alias = DispatchOptions {
        model: "O".to_string(),
        ..options()
    };
    scheduler.dispatch_one(&objective, None, &alias).expect("dispatch");
    assert_eq!(dispatcher.triggers()[0].inputs["model"], "opus");
}

/// Edits the objective while a dispatch is in flight.
struct MeddlingDispatcher<'a> {
    records: &'a FakeRecords,
    objective: u64,
}

impl Dispatcher for MeddlingDispatcher<'_> {
    fn trigger(&self, _instruction: &str, _inputs: &BTreeMap<String, String>) -> Result<RunReference> {
        let edited = roadmap(vec![
            step("1.1", NodeStatus::Done, &[]),
            step("2.1", NodeStatus::Pending, &["1.1"]),
        ]);
        self.records.edit_body(self.objective, &objective_body(&edited));
        Ok(RunReference {
            workflow: "orchard-implement.yml".to_string(),
            url: None,
        })
    }
}

#[test]
fn concurrent_roadmap_edit_is_a_conflict() {
    let records = FakeRecords::new();
    let (number, objective) = seed(&records, &fan_out_roadmap());
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let roadmaps = RecordRoadmapStore::new(&records);
    let dispatcher = MeddlingDispatcher {
        records: &records,
        objective: number,
    };

    let err = ObjectiveScheduler::new(&roadmaps, &plans, &dispatcher)
        .dispatch_one(&objective, None, &options())
        .expect_err("conflict");

    assert!(matches!(domain(&err), OrchardError::Conflict(_)));
    assert_eq!(records.body_writes(number), 0);
    assert_eq!(exit_codes::for_error(domain(&err)), exit_codes::CONFLICT);
}

fn ids_and_phases(ready: Vec<UnblockedNode>) -> Vec<(String, String)> {
    ready.into_iter().map(|r| (r.node.id, r.phase)).collect()
}

#[test]
fn resolve_unblocked_lists_siblings_with_phase_names() {
    let records = FakeRecords::new();
    let (number, objective) = seed(
        &records,
        &roadmap(vec![
            step("1.1", NodeStatus::Done, &[]),
            step("2.1", NodeStatus::Pending, &["1.1"]),
            step("2.2", NodeStatus::Pending, &["1.1"]),
            step("3.1", NodeStatus::Pending, &["2.1", "2.2"]),
        ]),
    );
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let roadmaps = RecordRoadmapStore::new(&records);
    let dispatcher = RecordingDispatcher::new();
    let scheduler = ObjectiveScheduler::new(&roadmaps, &plans, &dispatcher);

    assert_eq!(
        ids_and_phases(scheduler.resolve_unblocked(&objective).expect("unblocked")),
        vec![
            ("2.1".to_string(), "Phase 2".to_string()),
            ("2.2".to_string(), "Phase 2".to_string()),
        ]
    );

    let snapshot = roadmaps.load(&objective).expect("roadmap");
    let mut updated = snapshot.roadmap.clone();
    updated.nodes[1].status = NodeStatus::Done;
    roadmaps.save(&snapshot, &updated).expect("mark 2.1 done");

    assert_eq!(
        ids_and_phases(scheduler.resolve_unblocked(&objective).expect("unblocked")),
        vec![("2.2".to_string(), "Phase 2".to_string())]
    );
    assert_eq!(records.body_writes(number), 1);
    assert!(dispatcher.triggers().is_empty());
}

#[test]
fn resolve_unblocked_with_nothing_ready_is_an_error() {
    let records = FakeRecords::new();
    let (_, objective) = seed(
        &records,
        &roadmap(vec![
            step("1.1", NodeStatus::Planning, &[]),
            step("1.2", NodeStatus::Pending, &["1.1"]),
        ]),
    );
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let roadmaps = RecordRoadmapStore::new(&records);
    let dispatcher = RecordingDispatcher::new();

    let err = ObjectiveScheduler::new(&roadmaps, &plans, &dispatcher)
        .resolve_unblocked(&objective)
        .expect_err("nothing ready");

    assert!(matches!(domain(&err), OrchardError::NoUnblockedNodes(id) if *id == objective));
}
