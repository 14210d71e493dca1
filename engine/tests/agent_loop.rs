//! End-to-end agent loop scenarios driven by scripted collaborators.
//!
//! The model, subprocess runner, and confirmer are scripted; file effects are
//! real and happen inside a temporary project.

use std::thread;
use std::time::{Duration, Instant};

use engine::core::confirm::ConfirmPolicy;
use engine::core::types::{ActionResult, ActionType, ModelResponse, Role};
use engine::io::config::EngineConfig;
use engine::looping::{AbortReason, TaskStatus};
use engine::session::{AgentEvent, AgentSession, AgentState, Confirmation, ignore_events};
use engine::test_support::{
    ScriptedCommand, ScriptedCommandRunner, ScriptedConfirmer, ScriptedModel, TestProject,
    text_call, wait_for,
};
use pretty_assertions::assert_eq;

fn reply(text: String) -> Result<ModelResponse, String> {
    Ok(ModelResponse::Text(text))
}

fn node_project() -> TestProject {
    let project = TestProject::new().expect("project");
    project
        .write("package.json", r#"{"scripts": {"test": "jest"}}"#)
        .expect("write package.json");
    project
        .write("src/sum.js", "module.exports = (a, b) => a - b;\n")
        .expect("write sum.js");
    project
}

/// "fix failing tests": the first verification reports two failing suites,
/// one fix iteration edits the code, and the second verification passes.
#[test]
fn failing_tests_are_fixed_in_one_attempt() {
    let project = node_project();
    let model = ScriptedModel::new(vec![
        reply(text_call(
            "edit_file",
            r#"{"path": "src/sum.js", "old_text": "a - b", "new_text": "a * b"}"#,
        )),
        reply("Updated sum.js.".to_string()),
        reply(text_call(
            "edit_file",
            r#"{"path": "src/sum.js", "old_text": "a * b", "new_text": "a + b"}"#,
        )),
        reply("Both suites pass now.".to_string()),
    ]);
    let jest_failure = " FAIL src/sum.test.js\n FAIL src/math.test.js\nTests: 2 failed, 2 total\n";
    let runner = ScriptedCommandRunner::new(vec![
        ScriptedCommandRunner::exit(1, jest_failure),
        ScriptedCommandRunner::exit(0, "Tests: 2 passed, 2 total\n"),
    ]);
    let config = EngineConfig {
        confirm: ConfirmPolicy::Never,
        ..EngineConfig::default()
    };
    let session = AgentSession::new(project.root(), config, &model, &runner);

    let mut states = Vec::new();
    let outcome = session
        .run_task("fix failing tests", &mut |event: AgentEvent<'_>| {
            if let AgentEvent::State(state) = event {
                states.push(state);
            }
        })
        .expect("run");

    assert!(outcome.is_completed(), "{:?}", outcome.status);
    assert_eq!(outcome.fix_attempts, 1);
    assert!(outcome.fix_attempts <= 3);
    assert_eq!(outcome.residual, None);
    assert_eq!(outcome.iterations, 4);
    assert_eq!(
        project.read("src/sum.js").expect("read"),
        "module.exports = (a, b) => a + b;\n"
    );

    assert_eq!(outcome.verification.len(), 2);
    assert!(!outcome.verification[0].success);
    assert_eq!(outcome.verification[0].errors.len(), 2);
    assert_eq!(outcome.verification[0].command, "npm test");
    assert!(outcome.verification[1].success);

    let requests = runner.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].program, "npm");
    assert!(requests[0].env.contains(&("CI".to_string(), "1".to_string())));

    let fix_turn = &model.histories()[2];
    let instruction = fix_turn.last().expect("fix instruction");
    assert_eq!(instruction.role, Role::User);
    assert!(instruction.content.contains("fix attempt 1 of 3"));
    assert!(instruction.content.contains("src/sum.test.js"));
    assert!(instruction.content.ends_with("fix failing tests"));

    assert_eq!(states.first(), Some(&AgentState::Thinking));
    assert!(states.contains(&AgentState::Verifying));
    assert_eq!(states.last(), Some(&AgentState::Completed));
}

/// Cancelling while a command runs kills it and keeps earlier actions.
#[test]
fn cancel_during_command_aborts_with_earlier_actions() {
    let project = node_project();
    let model = ScriptedModel::new(vec![
        reply(text_call(
            "write_file",
            r#"{"path": "notes.txt", "content": "started\n"}"#,
        )),
        reply(text_call(
            "execute_command",
            r#"{"command": "npm", "args": ["run", "watch"]}"#,
        )),
        reply("unreachable".to_string()),
    ]);
    let runner = ScriptedCommandRunner::new(vec![ScriptedCommand::UntilCancelled]);
    let config = EngineConfig {
        confirm: ConfirmPolicy::Never,
        ..EngineConfig::default()
    };
    let session = AgentSession::new(project.root(), config, &model, &runner);
    let handle = session.handle();

    let started = Instant::now();
    let outcome = thread::scope(|scope| {
        scope.spawn(|| {
            let requested = wait_for(Duration::from_secs(10), || !runner.requests().is_empty());
            assert!(requested, "command never started");
            handle.cancel();
        });
        session
            .run_task("start the watcher", &mut ignore_events)
            .expect("run")
    });

    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(matches!(
        outcome.status,
        TaskStatus::Aborted(AbortReason::Cancelled)
    ));
    assert_eq!(outcome.iterations, 2);
    assert_eq!(model.calls(), 2);
    let types: Vec<ActionType> = outcome.actions.iter().map(|a| a.action_type).collect();
    assert_eq!(types, vec![ActionType::Write, ActionType::Command]);
    assert_eq!(outcome.actions[0].result, ActionResult::Success);
    assert_eq!(outcome.actions[1].result, ActionResult::Error);
    assert_eq!(
        project.read("notes.txt").expect("write kept"),
        "started\n"
    );
    assert_eq!(handle.state(), AgentState::Aborted);
    assert!(!handle.is_running());
}

#[cfg(unix)]
#[test]
fn cancel_kills_a_real_subprocess() {
    use engine::io::process::SystemCommandRunner;

    let project = TestProject::new().expect("project");
    let model = ScriptedModel::new(vec![reply(text_call(
        "execute_command",
        r#"{"command": "sleep", "args": ["30"]}"#,
    ))]);
    let runner = SystemCommandRunner;
    let config = EngineConfig {
        confirm: ConfirmPolicy::Never,
        safety: engine::io::config::SafetyConfig {
            extra_allowed_commands: vec!["sleep".to_string()],
        },
        ..EngineConfig::default()
    };
    let session = AgentSession::new(project.root(), config, &model, &runner);
    let handle = session.handle();

    let started = Instant::now();
    let outcome = thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(300));
            handle.cancel();
        });
        session
            .run_task("sleep", &mut ignore_events)
            .expect("run")
    });

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome.state(), AgentState::Aborted);
    assert_eq!(outcome.actions.len(), 1);
    assert_eq!(
        outcome.actions[0].details.as_deref(),
        Some("`sleep 30` failed: cancelled")
    );
}

/// A denied call is reported to the model; the task keeps going.
#[test]
fn denial_is_fed_back_and_the_task_continues() {
    let project = node_project();
    let model = ScriptedModel::new(vec![
        reply(text_call("delete_file", r#"{"path": "src/sum.js"}"#)),
        reply("Understood, leaving the file in place.".to_string()),
    ]);
    let runner = ScriptedCommandRunner::new(Vec::new());
    let confirmer = ScriptedConfirmer::new(vec![Confirmation::Deny]);
    let session = AgentSession::new(project.root(), EngineConfig::default(), &model, &runner)
        .with_confirmer(&confirmer);

    let mut denied = Vec::new();
    let outcome = session
        .run_task("clean up", &mut |event: AgentEvent<'_>| {
            if let AgentEvent::Denied(call) = event {
                denied.push(call.tool());
            }
        })
        .expect("run");

    assert!(outcome.is_completed());
    assert_eq!(denied.len(), 1);
    assert_eq!(outcome.actions.len(), 1);
    assert_eq!(outcome.actions[0].action_type, ActionType::Delete);
    assert_eq!(outcome.actions[0].result, ActionResult::Error);
    assert!(project.path("src/sum.js").exists());
    assert!(outcome.verification.is_empty());

    let second_turn = &model.histories()[1];
    let feedback = second_turn.last().expect("tool message");
    assert_eq!(feedback.role, Role::Tool);
    assert!(feedback.content.contains("denied by user"));
}

/// Dry run previews changes without applying them and never asks.
#[test]
fn dry_run_leaves_the_project_untouched() {
    let project = node_project();
    let model = ScriptedModel::new(vec![
        reply(text_call(
            "write_file",
            r#"{"path": "src/sum.js", "content": "module.exports = (a, b) => a + b;\n"}"#,
        )),
        reply("Would fix sum.js.".to_string()),
    ]);
    let runner = ScriptedCommandRunner::new(Vec::new());
    let confirmer = ScriptedConfirmer::new(vec![Confirmation::Deny]);
    let config = EngineConfig {
        dry_run: true,
        confirm: ConfirmPolicy::Always,
        ..EngineConfig::default()
    };
    let session =
        AgentSession::new(project.root(), config, &model, &runner).with_confirmer(&confirmer);

    let mut previews = 0;
    let outcome = session
        .run_task("fix sum", &mut |event: AgentEvent<'_>| {
            if let AgentEvent::Preview { diff, .. } = event {
                assert_eq!(diff.additions(), 1);
                previews += 1;
            }
        })
        .expect("run");

    assert!(outcome.is_completed());
    assert_eq!(previews, 1);
    assert_eq!(confirmer.asked(), 0);
    assert!(runner.requests().is_empty());
    assert_eq!(
        project.read("src/sum.js").expect("read"),
        "module.exports = (a, b) => a - b;\n"
    );
}

#[test]
fn time_budget_aborts_before_the_first_model_call() {
    let project = TestProject::new().expect("project");
    let model = ScriptedModel::new(Vec::new());
    let runner = ScriptedCommandRunner::new(Vec::new());
    let config = EngineConfig {
        max_duration_secs: 0,
        ..EngineConfig::default()
    };
    let session = AgentSession::new(project.root(), config, &model, &runner);
    let outcome = session.run_task("anything", &mut ignore_events);

    match outcome {
        Ok(outcome) => {
            assert!(matches!(
                outcome.status,
                TaskStatus::Aborted(AbortReason::TimeLimit { .. })
            ));
            assert_eq!(model.calls(), 0);
        }
        Err(err) => panic!("unexpected error: {err:#}"),
    }
}
