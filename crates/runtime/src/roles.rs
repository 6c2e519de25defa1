//! Built-in role catalog.
//!
//! One runtime, many roles: each descriptor carries the system prompt,
//! capability set, and write policy that specialize an agent's behavior.

use swarm_common::{Capability, RoleDescriptor, WritePolicy};

const PLANNER_PROMPT: &str = "You are the planner of a multi-agent coding swarm. \
Break the mission into a complete task plan up front with create_tasks, then finalize_plan. \
Assign every task, monitor progress, evaluate suggest_task requests, and call done \
only when every task is complete. All task creation flows through you.";

const DEVELOPER_PROMPT: &str = "You are a developer in a multi-agent coding swarm. \
Work your assigned tasks: read files before editing them, make targeted edits, run \
commands to verify, and move tasks through in_progress -> in_review. Hand off to the \
reviewer when implementation is complete.";

const REVIEWER_PROMPT: &str = "You are the code reviewer of a multi-agent coding swarm. \
Read changed files and review them for correctness and quality. You cannot modify files: \
approve with submit_review, or request changes and suggest fix tasks to the planner.";

const TESTER_PROMPT: &str = "You are the tester of a multi-agent coding swarm. \
Write and run tests for completed work, report results with report_tests, and file \
suggestions for failures. You may only write test files.";

pub fn planner() -> RoleDescriptor {
    RoleDescriptor {
        name: "Planner".into(),
        system_prompt: PLANNER_PROMPT.into(),
        capabilities: [
            Capability::TaskPlanning,
            Capability::CodeWrite,
            Capability::CommandExecution,
        ]
        .into_iter()
        .collect(),
        write_policy: WritePolicy::Full,
        privileged: true,
        proactive: true,
    }
}

pub fn developer() -> RoleDescriptor {
    RoleDescriptor {
        name: "Developer".into(),
        system_prompt: DEVELOPER_PROMPT.into(),
        capabilities: [Capability::CodeWrite, Capability::CommandExecution]
            .into_iter()
            .collect(),
        write_policy: WritePolicy::Full,
        privileged: false,
        proactive: false,
    }
}

pub fn reviewer() -> RoleDescriptor {
    RoleDescriptor {
        name: "Reviewer".into(),
        system_prompt: REVIEWER_PROMPT.into(),
        capabilities: [Capability::CodeReview].into_iter().collect(),
        write_policy: WritePolicy::ReadOnly,
        privileged: false,
        proactive: false,
    }
}

pub fn tester() -> RoleDescriptor {
    RoleDescriptor {
        name: "Tester".into(),
        system_prompt: TESTER_PROMPT.into(),
        capabilities: [
            Capability::CodeWrite,
            Capability::CommandExecution,
            Capability::TestExecution,
        ]
        .into_iter()
        .collect(),
        write_policy: WritePolicy::TestsOnly {
            patterns: vec![
                "test_".into(),
                "tests/".into(),
                "spec/".into(),
                "__tests__/".into(),
                "_test.".into(),
                ".test.".into(),
            ],
        },
        privileged: false,
        proactive: false,
    }
}
