//! Plan lifecycle from dispatch through start, submit, and land.

use orchard::core::plan::{KEY_BRANCH_NAME, KEY_WORKTREE_NAME};
use orchard::core::roadmap::NodeStatus;
use orchard::core::topology::BranchTopology;
use orchard::core::types::{EventKind, LifecycleStage, RecordState};
use orchard::error::OrchardError;
use orchard::io::roadmap_store::{RecordRoadmapStore, RoadmapStore};
use orchard::objective::{DispatchOptions, ObjectiveScheduler};
use orchard::plans::{CreatePlan, DraftPrPlanStore, IssuePlanStore, PlanStore};
use orchard::slots::{AcquireAction, SlotPool};
use orchard::test_support::{
    FakePublisher, FakeRecords, FakeStack, FakeWorkspaces, MemoryPoolStore, RecordingDispatcher,
    objective_body, roadmap, step,
};
use orchard::work::{SubmitRequest, land_plan, start_plan, submit_plan};

const SLOTS: &str = "/ws/widgets";

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

#[test]
fn dispatched_step_runs_to_landed() {
    let records = FakeRecords::new();
    let objective = records
        .insert_issue(
            "Objective",
            &objective_body(&roadmap(vec![
                step("1.1", NodeStatus::Pending, &[]),
                step("1.2", NodeStatus::Pending, &["1.1"]),
            ])),
        )
        .to_string();
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let roadmaps = RecordRoadmapStore::new(&records);
    let dispatcher = RecordingDispatcher::new();

    let report = ObjectiveScheduler::new(&roadmaps, &plans, &dispatcher)
        .dispatch_one(&objective, None, &options())
        .expect("dispatch");
    let plan_id = report.dispatched[0].plan_id.clone().expect("plan id");
    assert_eq!(plans.get(&plan_id).expect("plan").lifecycle_stage(), LifecycleStage::Queued);

    let workspaces = FakeWorkspaces::new("main");
    let pool_store = MemoryPoolStore::new();
    let pool = SlotPool::new(&pool_store, &workspaces, 2, SLOTS);
    let stack = FakeStack::default();
    let topology = BranchTopology::new("main", false);

    let started = start_plan(&plans, &pool, &stack, &topology, "main", &plan_id, false).expect("start");
    assert_eq!(started.branch, format!("P{plan_id}-step-1-1"));
    assert_eq!(started.parent, "main");
    assert_eq!(started.plan.lifecycle_stage(), LifecycleStage::Implementing);
    assert_eq!(started.plan.metadata_str(KEY_WORKTREE_NAME), Some("orchard-slot-01"));
    assert_eq!(started.plan.metadata_str(KEY_BRANCH_NAME), Some(started.branch.as_str()));
    assert!(stack.track_calls().is_empty());
    let pool_state = pool_store.current().expect("pool state");
    let slot = pool_state.find_slot("orchard-slot-01").expect("slot");
    assert_eq!(slot.last_objective.as_deref(), Some(objective.as_str()));

    let submitted = submit_plan(
        &plans,
        &roadmaps,
        &stack,
        &topology,
        &plan_id,
        SubmitRequest {
            pr: "https://github.com/acme/widgets/pull/40",
            parent: "main",
            submitted_by: Some("octocat"),
        },
    )
    .expect("submit");
    assert_eq!(submitted.footer, Some(format!("Closes #{plan_id}")));
    assert_eq!(submitted.node_marked.as_deref(), Some("1.1"));
    let node = roadmaps.load(&objective).expect("roadmap").roadmap.nodes[0].clone();
    assert_eq!(node.status, NodeStatus::InProgress);
    assert_eq!(node.pr.as_deref(), Some("#40"));

    let landed = land_plan(&plans, &roadmaps, &plan_id, Some("40")).expect("land");
    assert!(landed.record_closed);
    assert_eq!(landed.nodes_done, vec!["1.1"]);
    assert_eq!(landed.plan.lifecycle_stage(), LifecycleStage::Landed);
    let number: u64 = plan_id.parse().expect("number");
    assert_eq!(records.record(number).expect("record").state, RecordState::Closed);

    let snapshot = roadmaps.load(&objective).expect("roadmap");
    let graph = snapshot.roadmap.graph().expect("graph");
    assert!(graph.is_unblocked(&snapshot.roadmap.nodes[1]));

    let kinds: Vec<EventKind> = plans
        .list_events(&plan_id)
        .expect("events")
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Created,
            EventKind::Queued,
            EventKind::WorkflowStarted,
            EventKind::Implementing,
            EventKind::Submitted,
            EventKind::Landed,
        ]
    );
}

#[test]
fn event_log_reads_are_stable() {
    let records = FakeRecords::new();
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let plan = plans
        .create(&CreatePlan {
            content: "# Tidy config loading".to_string(),
            ..CreatePlan::default()
        })
        .expect("create");
    plans
        .advance(&plan.identifier, LifecycleStage::Queued, Default::default())
        .expect("queue");

    let first = plans.list_events(&plan.identifier).expect("first read");
    let second = plans.list_events(&plan.identifier).expect("second read");
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[test]
fn starting_a_landed_plan_is_refused() {
    let records = FakeRecords::new();
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let plan = plans
        .create(&CreatePlan {
            content: "# Done already".to_string(),
            ..CreatePlan::default()
        })
        .expect("create");
    land_plan(&plans, &RecordRoadmapStore::new(&records), &plan.identifier, None).expect("land");

    let workspaces = FakeWorkspaces::new("main");
    let pool_store = MemoryPoolStore::new();
    let pool = SlotPool::new(&pool_store, &workspaces, 2, SLOTS);
    let err = start_plan(
        &plans,
        &pool,
        &FakeStack::default(),
        &BranchTopology::new("main", false),
        "main",
        &plan.identifier,
        false,
    )
    .expect_err("landed");

    assert!(matches!(domain(&err), OrchardError::InvalidTransition { .. }));
    assert_eq!(pool_store.saves(), 0);
}

#[test]
fn stacked_start_requires_a_tracked_parent() {
    let records = FakeRecords::new();
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let plan = plans
        .create(&CreatePlan {
            content: "# Follow-up".to_string(),
            ..CreatePlan::default()
        })
        .expect("create");
    let workspaces = FakeWorkspaces::new("main");
    let pool_store = MemoryPoolStore::new();
    let pool = SlotPool::new(&pool_store, &workspaces, 2, SLOTS);
    let topology = BranchTopology::new("main", true);

    let err = start_plan(&plans, &pool, &FakeStack::default(), &topology, "feature-a", &plan.identifier, false)
        .expect_err("untracked");
    assert!(matches!(domain(&err), OrchardError::UntrackedParent { branch, .. } if branch == "feature-a"));
    assert!(workspaces.calls().is_empty());

    let stack = FakeStack::tracking(&["feature-a"]);
    let started = start_plan(&plans, &pool, &stack, &topology, "feature-a", &plan.identifier, false)
        .expect("start");
    assert_eq!(started.parent, "feature-a");
    assert_eq!(
        stack.track_calls(),
        vec![(started.branch.clone(), "feature-a".to_string())]
    );
}

#[test]
fn retried_start_tracks_a_branch_whose_first_tracking_failed() {
    let records = FakeRecords::new();
    let plans = IssuePlanStore::new(&records, "orchard-plan");
    let plan = plans
        .create(&CreatePlan {
            content: "# Retry tracking".to_string(),
            ..CreatePlan::default()
        })
        .expect("create");
    let workspaces = FakeWorkspaces::new("main");
    let pool_store = MemoryPoolStore::new();
    let pool = SlotPool::new(&pool_store, &workspaces, 2, SLOTS);
    let topology = BranchTopology::new("main", true);
    let stack = FakeStack::failing_first_track(&[]);

    start_plan(&plans, &pool, &stack, &topology, "main", &plan.identifier, false).expect_err("tracking fails");
    assert_eq!(pool_store.saves(), 1);
    assert!(stack.track_calls().is_empty());

    let started = start_plan(&plans, &pool, &stack, &topology, "main", &plan.identifier, false).expect("retry");

    assert_eq!(started.slot.action, AcquireAction::Reused);
    assert_eq!(stack.track_calls(), vec![(started.branch.clone(), "main".to_string())]);
    assert_eq!(started.plan.lifecycle_stage(), LifecycleStage::Implementing);
}

#[test]
fn draft_pr_plans_leave_closing_to_the_merge() {
    let records = FakeRecords::new();
    let publisher = FakePublisher::default();
    let plans = DraftPrPlanStore::new(&records, &publisher, "orchard-plan", "main");
    let plan = plans
        .create(&CreatePlan {
            content: "# Draft backed".to_string(),
            ..CreatePlan::default()
        })
        .expect("create");
    let roadmaps = RecordRoadmapStore::new(&records);

    let submitted = submit_plan(
        &plans,
        &roadmaps,
        &FakeStack::default(),
        &BranchTopology::new("main", false),
        &plan.identifier,
        SubmitRequest {
            pr: "#7",
            parent: "main",
            submitted_by: None,
        },
    )
    .expect("submit");
    assert_eq!(submitted.footer, None);
    assert_eq!(submitted.node_marked, None);

    let landed = land_plan(&plans, &roadmaps, &plan.identifier, None).expect("land");
    assert!(!landed.record_closed);
    assert_eq!(landed.plan.state, RecordState::Open);
}
