//! End-to-end tests for the agent loop with scripted models.
//!
//! Most tests run in yolo mode so no human is involved; execution-specific
//! behaviour (timeouts, the sentinel) uses the real local shell.

use std::sync::Arc;
use std::time::Duration;

use shellpilot::agent::Agent;
use shellpilot::core::mode::Mode;
use shellpilot::core::types::{ExitStatus, Role, Submission};
use shellpilot::io::config::{AgentConfig, ExecutorConfig};
use shellpilot::io::cost::CostTracker;
use shellpilot::io::executor::LocalExecutor;
use shellpilot::io::model::Model;
use shellpilot::test_support::{
    ScriptedExec, ScriptedExecutor, ScriptedModel, agent_config, workdir,
};

fn bash(command: &str) -> String {
    format!("Let me run this.\n```bash\n{command}\n```")
}

fn yolo() -> AgentConfig {
    agent_config(Mode::Yolo)
}

#[test]
fn two_step_run_submits_with_six_messages() {
    let model = ScriptedModel::new([
        bash("echo hi"),
        bash("echo COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT; echo done"),
    ]);
    let executor = ScriptedExecutor::new([ScriptedExec::ok("hi\n"), ScriptedExec::submit("done")]);
    let mut agent = Agent::new(yolo(), model, executor).expect("agent");

    let (status, result) = agent.run("say hi");

    assert_eq!(
        status,
        ExitStatus::Submitted(Submission::Text("done".to_string()))
    );
    assert_eq!(result, "done");
    assert_eq!(agent.model().n_calls(), 2);

    let roles: Vec<Role> = agent.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant,
            Role::User,
        ]
    );
    assert!(agent.messages()[1].text().contains("Your task: say hi."));
    assert_eq!(
        agent.messages()[3].text(),
        "<returncode>0</returncode>\n<output>\nhi\n</output>"
    );
    assert_eq!(agent.messages()[5].text(), "done");
    assert_eq!(agent.model().seen_history_lengths(), &[2, 4]);
}

#[test]
fn step_limit_stops_before_the_next_query() {
    let model = ScriptedModel::new(vec![bash("ls"); 5]);
    let executor = ScriptedExecutor::new(vec![ScriptedExec::ok("file\n"); 5]);
    let config = AgentConfig {
        step_limit: 2,
        ..yolo()
    };
    let mut agent = Agent::new(config, model, executor).expect("agent");

    let (status, result) = agent.run("loop forever");

    assert_eq!(status, ExitStatus::LimitsExceeded);
    assert_eq!(result, "");
    assert_eq!(agent.model().n_calls(), 2);
    assert_eq!(agent.model().remaining(), 3);
    assert_eq!(agent.executor().requests().len(), 2);
}

#[test]
fn cost_limit_stops_once_reached() {
    let model = ScriptedModel::new(vec![bash("ls"); 5]).with_cost_per_call(0.6);
    let executor = ScriptedExecutor::new(vec![ScriptedExec::ok(""); 5]);
    let config = AgentConfig {
        cost_limit: 1.0,
        ..yolo()
    };
    let mut agent = Agent::new(config, model, executor).expect("agent");

    let (status, _) = agent.run("spend");

    assert_eq!(status, ExitStatus::LimitsExceeded);
    assert_eq!(agent.model().n_calls(), 2);
}

#[test]
fn cost_already_at_limit_never_queries() {
    let model = ScriptedModel::new([bash("ls")]).with_initial_cost(5.0);
    let config = AgentConfig {
        cost_limit: 5.0,
        ..yolo()
    };
    let mut agent = Agent::new(config, model, ScriptedExecutor::default()).expect("agent");

    let (status, _) = agent.run("nothing");

    assert_eq!(status, ExitStatus::LimitsExceeded);
    assert_eq!(agent.model().n_calls(), 0);
    assert_eq!(agent.messages().len(), 3);
}

#[test]
fn malformed_responses_are_never_executed() {
    let model = ScriptedModel::new([
        "I think we are done.".to_string(),
        "```bash\necho a\n```\nor\n```bash\necho b\n```".to_string(),
        bash("echo COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT"),
    ]);
    let executor = ScriptedExecutor::new([ScriptedExec::submit("ok")]);
    let mut agent = Agent::new(yolo(), model, executor).expect("agent");

    let (status, _) = agent.run("format");

    assert!(matches!(status, ExitStatus::Submitted(_)));
    assert_eq!(
        agent.executor().commands(),
        vec!["echo COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT".to_string()]
    );
    let format_errors: Vec<String> = agent
        .messages()
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.text())
        .filter(|text| text.contains("EXACTLY ONE action"))
        .collect();
    assert_eq!(format_errors.len(), 2);
    assert!(format_errors[0].contains("found 0 actions"));
    assert!(format_errors[1].contains("found 2 actions"));
}

#[test]
fn inline_timeout_is_capped_at_max_timeout() {
    let model = ScriptedModel::new([
        bash("# timeout: 999\nmake test"),
        bash("# timeout: 20\nmake"),
    ]);
    let executor = ScriptedExecutor::new([ScriptedExec::ok("ok\n"), ScriptedExec::submit("built")]);
    let config = AgentConfig {
        max_timeout: 300,
        ..yolo()
    };
    let mut agent = Agent::new(config, model, executor).expect("agent");

    agent.run("test");

    let requests = agent.executor().requests();
    assert_eq!(requests[0].command, "make test");
    assert_eq!(requests[0].timeout, Some(Duration::from_secs(300)));
    assert_eq!(requests[1].command, "make");
    assert_eq!(requests[1].timeout, Some(Duration::from_secs(20)));
}

#[test]
fn plain_action_uses_executor_default_timeout() {
    let model = ScriptedModel::new([bash("ls")]);
    let executor = ScriptedExecutor::new([ScriptedExec::submit("x")]);
    let mut agent = Agent::new(yolo(), model, executor).expect("agent");

    agent.run("ls");

    assert_eq!(agent.executor().requests()[0].timeout, None);
}

#[test]
fn sentinel_with_nothing_after_is_an_empty_submission() {
    let model = ScriptedModel::new([bash("echo COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT")]);
    let executor = ScriptedExecutor::new([ScriptedExec::ok(
        "COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT\n",
    )]);
    let mut agent = Agent::new(yolo(), model, executor).expect("agent");

    let (status, result) = agent.run("nothing to report");

    assert_eq!(status, ExitStatus::Submitted(Submission::Empty));
    assert_eq!(result, "");
}

#[test]
fn exhausted_model_ends_in_error() {
    let model = ScriptedModel::new([bash("ls")]);
    let executor = ScriptedExecutor::new([ScriptedExec::ok("a\n")]);
    let mut agent = Agent::new(yolo(), model, executor).expect("agent");

    let (status, result) = agent.run("keep going");

    let ExitStatus::Error(detail) = status else {
        panic!("expected error, got {status:?}");
    };
    assert!(detail.contains("scripted model exhausted after 1 calls"));
    assert_eq!(result, detail);
    assert_eq!(agent.messages().last().map(|m| m.text()), Some(detail));
}

#[test]
fn executor_failure_ends_in_error() {
    let model = ScriptedModel::new([bash("ls")]);
    let mut agent = Agent::new(yolo(), model, ScriptedExecutor::default()).expect("agent");

    let (status, _) = agent.run("ls");

    assert!(
        matches!(status, ExitStatus::Error(ref detail) if detail.contains("scripted executor"))
    );
}

#[test]
fn global_call_limit_is_fatal_and_shared() {
    let tracker = Arc::new(CostTracker::new(0.0, 3));

    let first = ScriptedModel::new(vec![bash("ls"); 2]).with_tracker(Arc::clone(&tracker));
    let executor = ScriptedExecutor::new([ScriptedExec::ok(""), ScriptedExec::submit("one")]);
    let mut agent = Agent::new(yolo(), first, executor).expect("agent");
    assert!(matches!(agent.run("first").0, ExitStatus::Submitted(_)));

    let second = ScriptedModel::new(vec![bash("ls"); 5]).with_tracker(Arc::clone(&tracker));
    let executor = ScriptedExecutor::new(vec![ScriptedExec::ok(""); 5]);
    let mut agent = Agent::new(yolo(), second, executor).expect("agent");
    let (status, _) = agent.run("second");

    let ExitStatus::Error(detail) = status else {
        panic!("expected error, got {status:?}");
    };
    assert!(detail.contains("global cost/call limit exceeded"));
    assert_eq!(agent.executor().requests().len(), 1);
    assert_eq!(tracker.n_calls(), 4);
}

#[test]
fn undefined_template_variable_is_an_error_not_a_panic() {
    let config = AgentConfig {
        system_template: "You are {{ persona }}.".to_string(),
        ..yolo()
    };
    let model = ScriptedModel::new([bash("ls")]);
    let mut agent = Agent::new(config, model, ScriptedExecutor::default()).expect("agent");

    let (status, _) = agent.run("x");

    assert!(matches!(status, ExitStatus::Error(ref detail) if detail.contains("system")));
    assert_eq!(agent.model().n_calls(), 0);
}

#[test]
fn trajectory_reports_status_and_stats() {
    let model = ScriptedModel::new([bash("echo COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT; echo 42")])
        .with_cost_per_call(0.25);
    let executor = ScriptedExecutor::new([ScriptedExec::submit("42")]);
    let mut agent = Agent::new(yolo(), model, executor).expect("agent");
    let (status, _) = agent.run("answer");

    let trajectory = agent.trajectory(Some(&status));
    assert_eq!(trajectory.info.exit_status.as_deref(), Some("Submitted"));
    assert_eq!(trajectory.info.submission.as_deref(), Some("42"));
    assert_eq!(trajectory.info.model_stats.api_calls, 1);
    assert_eq!(trajectory.info.model_stats.instance_cost, 0.25);
    assert_eq!(trajectory.messages.len(), 4);
}

#[cfg(unix)]
#[test]
fn timed_out_command_is_recoverable_and_keeps_partial_output() {
    let temp = workdir();
    let executor = LocalExecutor::new(ExecutorConfig {
        cwd: Some(temp.path().to_path_buf()),
        timeout_secs: 1,
        ..ExecutorConfig::default()
    });
    let model = ScriptedModel::new([
        bash("echo started; sleep 5"),
        bash("printf 'COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT\\nrecovered\\n'"),
    ]);
    let mut agent = Agent::new(yolo(), model, executor).expect("agent");

    let (status, result) = agent.run("wait");

    assert_eq!(
        status,
        ExitStatus::Submitted(Submission::Text("recovered".to_string()))
    );
    assert_eq!(result, "recovered");
    let timeout_message = agent.messages()[3].text();
    assert!(timeout_message.contains("<command>echo started; sleep 5</command> timed out"));
    assert!(timeout_message.contains("started"));
}

#[cfg(unix)]
#[test]
fn observation_carries_returncode_from_the_shell() {
    let temp = workdir();
    let executor = LocalExecutor::new(ExecutorConfig {
        cwd: Some(temp.path().to_path_buf()),
        ..ExecutorConfig::default()
    });
    let model = ScriptedModel::new([
        bash("ls missing-file"),
        bash("echo COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT"),
    ]);
    let mut agent = Agent::new(yolo(), model, executor).expect("agent");

    let (status, _) = agent.run("inspect");

    assert_eq!(status, ExitStatus::Submitted(Submission::Empty));
    let observation = agent.messages()[3].text();
    assert!(!observation.contains("<returncode>0</returncode>"));
    assert!(observation.contains("missing-file"));
}
