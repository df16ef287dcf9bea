use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Per-company processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyState {
    NotStarted,
    Fetching,
    Merging,
    Validating,
    AwaitingHumanInput,
    Persisted,
    Failed,
}

impl CompanyState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompanyState::Persisted | CompanyState::Failed)
    }

    pub fn can_transition_to(&self, next: CompanyState) -> bool {
        use CompanyState::*;
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return *self != NotStarted;
        }
        matches!(
            (self, next),
            (NotStarted, Fetching)
                | (Fetching, Merging)
                | (Merging, Validating)
                | (Merging, AwaitingHumanInput)
                | (Merging, Persisted)
                | (Validating, AwaitingHumanInput)
                | (Validating, Persisted)
                | (AwaitingHumanInput, Persisted)
        )
    }
}

impl fmt::Display for CompanyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompanyState::NotStarted => "not_started",
            CompanyState::Fetching => "fetching",
            CompanyState::Merging => "merging",
            CompanyState::Validating => "validating",
            CompanyState::AwaitingHumanInput => "awaiting_human_input",
            CompanyState::Persisted => "persisted",
            CompanyState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal transition for {company_key}: {from} -> {to}")]
pub struct IllegalTransition {
    pub company_key: String,
    pub from: CompanyState,
    pub to: CompanyState,
}

/// State of one company plus the path it took.
#[derive(Debug, Clone)]
pub struct CompanyRun {
    company_key: String,
    state: CompanyState,
    history: Vec<CompanyState>,
}

impl CompanyRun {
    pub fn new(company_key: &str) -> Self {
        Self {
            company_key: company_key.to_string(),
            state: CompanyState::NotStarted,
            history: vec![CompanyState::NotStarted],
        }
    }

    pub fn state(&self) -> CompanyState {
        self.state
    }

    pub fn history(&self) -> &[CompanyState] {
        &self.history
    }

    pub fn advance(&mut self, next: CompanyState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                company_key: self.company_key.clone(),
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(company_key = %self.company_key, from = %self.state, to = %next, "state change");
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CompanyState::*;

    #[test]
    fn happy_path_with_validation_and_human_gate() {
        let mut run = CompanyRun::new("acme");
        for next in [Fetching, Merging, Validating, AwaitingHumanInput, Persisted] {
            run.advance(next).unwrap();
        }
        assert_eq!(run.history().len(), 6);
        assert!(run.state().is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut run = CompanyRun::new("acme");
        run.advance(Fetching).unwrap();
        run.advance(Failed).unwrap();
        let err = run.advance(Merging).unwrap_err();
        assert_eq!(err.from, Failed);
        assert_eq!(err.to, Merging);
    }

    #[test]
    fn skipping_fetch_is_rejected() {
        assert!(!NotStarted.can_transition_to(Merging));
        assert!(!NotStarted.can_transition_to(Failed));
        assert!(Merging.can_transition_to(Failed));
        assert!(!Persisted.can_transition_to(Failed));
    }
}
