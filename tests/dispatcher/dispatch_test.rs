//! Ordering and fail-fast behaviour of `dispatch`.

use std::sync::Mutex;

use async_trait::async_trait;

use watchpost::dispatcher::{dispatch, ActionError, ActionRunner};
use watchpost::registry::Action;

/// Records every command it is asked to run and fails the ones named in `fail`.
#[derive(Default)]
struct RecordingRunner {
    ran: Mutex<Vec<String>>,
    fail: Vec<String>,
}

impl RecordingRunner {
    fn failing(commands: &[&str]) -> Self {
        Self {
            ran: Mutex::new(Vec::new()),
            fail: commands.iter().map(|c| (*c).to_owned()).collect(),
        }
    }

    fn ran(&self) -> Vec<String> {
        self.ran.lock().map(|ran| ran.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ActionRunner for RecordingRunner {
    async fn run(&self, action: &Action) -> Result<(), ActionError> {
        if let Ok(mut ran) = self.ran.lock() {
            ran.push(action.command.clone());
        }
        if self.fail.contains(&action.command) {
            return Err(ActionError::Spawn {
                command: action.command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "simulated"),
            });
        }
        Ok(())
    }
}

fn action(description: &str, command: &str) -> Action {
    Action {
        description: description.to_owned(),
        command: command.to_owned(),
        args: Vec::new(),
        timeout: None,
    }
}

#[tokio::test]
async fn runs_every_action_in_order() {
    let runner = RecordingRunner::default();
    let actions = vec![action("a", "A"), action("b", "B"), action("c", "C")];

    let ran = dispatch(&runner, &actions).await;
    assert!(matches!(ran, Ok(3)));
    assert_eq!(runner.ran(), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn first_failure_stops_the_chain() {
    let runner = RecordingRunner::failing(&["A"]);
    let actions = vec![action("restart", "A"), action("b", "B"), action("c", "C")];

    let err = match dispatch(&runner, &actions).await {
        Ok(n) => panic!("chain should fail, ran {n}"),
        Err(err) => err,
    };
    assert_eq!(err.index, 0);
    assert_eq!(err.description, "restart");
    assert_eq!(runner.ran(), vec!["A"]);
}

#[tokio::test]
async fn failure_in_the_middle_keeps_earlier_actions() {
    let runner = RecordingRunner::failing(&["B"]);
    let actions = vec![action("", "A"), action("", "B"), action("", "C")];

    let err = match dispatch(&runner, &actions).await {
        Ok(n) => panic!("chain should fail, ran {n}"),
        Err(err) => err,
    };
    assert_eq!(err.index, 1);
    // Empty descriptions fall back to the command.
    assert_eq!(err.description, "B");
    assert!(err.to_string().contains("action 1 (B) failed"));
    assert_eq!(runner.ran(), vec!["A", "B"]);
}

#[tokio::test]
async fn empty_chain_succeeds() {
    let runner = RecordingRunner::default();
    assert!(matches!(dispatch(&runner, &[]).await, Ok(0)));
}
