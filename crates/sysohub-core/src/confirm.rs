//! Confirmation seam for operations that overwrite an existing install

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::desired::SubsystemKind;

/// Decides whether a subsystem that is already installed gets reconverged
#[async_trait]
pub trait ConfirmationStrategy: Send + Sync {
    async fn confirm(&self, subsystem: SubsystemKind, question: &str) -> bool;
}

/// Answers yes to everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

#[async_trait]
impl ConfirmationStrategy for AlwaysConfirm {
    async fn confirm(&self, _subsystem: SubsystemKind, _question: &str) -> bool {
        true
    }
}

/// Replays a fixed list of answers, then answers no
#[derive(Debug, Default)]
pub struct ScriptedAnswers {
    answers: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<SubsystemKind>>,
}

impl ScriptedAnswers {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Subsystems asked about, in order
    pub fn asked(&self) -> Vec<SubsystemKind> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ConfirmationStrategy for ScriptedAnswers {
    async fn confirm(&self, subsystem: SubsystemKind, _question: &str) -> bool {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(subsystem);
        }
        self.answers
            .lock()
            .ok()
            .and_then(|mut a| a.pop_front())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_answers_run_out_to_no() {
        let strategy = ScriptedAnswers::new([true, false]);

        assert!(strategy.confirm(SubsystemKind::MessageBroker, "?").await);
        assert!(!strategy.confirm(SubsystemKind::FlowEngine, "?").await);
        assert!(!strategy.confirm(SubsystemKind::Dashboard, "?").await);
        assert_eq!(
            strategy.asked(),
            vec![
                SubsystemKind::MessageBroker,
                SubsystemKind::FlowEngine,
                SubsystemKind::Dashboard
            ]
        );
    }
}
