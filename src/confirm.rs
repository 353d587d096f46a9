//! Confirmation gate for destructive operations.
//!
//! `Proposed → Confirmed → Executed`, or `Proposed → Cancelled`. A proposal is
//! bound to its operation and exact identifier set through a
//! [`ConfirmationToken`]; answering with any other token is rejected. The only
//! way to obtain a [`ConfirmedAction`], which the session requires before
//! issuing a destructive call, is an affirmative answer to the matching
//! proposal.

use std::fmt;

use crate::error::{EnsueError, Result};
use crate::intent::Operation;

const AFFIRMATIVE: &[&str] = &["yes", "y", "confirm", "confirmed", "proceed", "do it"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmState {
    Proposed,
    Confirmed,
    Executed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfirmationToken {
    seq: u64,
    fingerprint: String,
}

impl fmt::Display for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.seq)
    }
}

/// A destructive action awaiting the user's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub token: ConfirmationToken,
    pub operation: Operation,
    /// Every key affected, in the order the user named them.
    pub identifiers: Vec<String>,
    /// User losing access, for revocations.
    pub user: Option<String>,
}

impl Proposal {
    /// User-facing confirmation prompt naming every affected identifier.
    pub fn prompt(&self) -> String {
        let mut out = match (self.operation, &self.user) {
            (Operation::Revoke, Some(user)) => {
                format!("About to revoke access for {user} to {} key(s):\n", self.identifiers.len())
            }
            _ => format!("About to {} {} key(s):\n", self.operation, self.identifiers.len()),
        };
        for id in &self.identifiers {
            out.push_str(&format!("  - {id}\n"));
        }
        out.push_str("This cannot be undone. Reply \"yes\" to proceed; anything else cancels.");
        out
    }
}

/// Proof that the user confirmed a specific proposal. Consumed on execution.
#[derive(Debug)]
pub struct ConfirmedAction {
    proposal: Proposal,
}

impl ConfirmedAction {
    pub fn proposal(&self) -> &Proposal {
        &self.proposal
    }
}

#[derive(Debug)]
pub enum Decision {
    Confirmed(ConfirmedAction),
    Cancelled(Proposal),
}

#[derive(Debug, Default)]
pub struct ConfirmationGate {
    pending: Option<(Proposal, ConfirmState)>,
    seq: u64,
}

fn fingerprint(operation: Operation, identifiers: &[String], user: Option<&str>) -> String {
    let mut ids = identifiers.to_vec();
    ids.sort();
    format!("{operation}|{}|{}", ids.join(","), user.unwrap_or(""))
}

pub fn is_affirmative(answer: &str) -> bool {
    let normalized = answer
        .trim()
        .trim_end_matches(['.', '!'])
        .trim()
        .to_lowercase();
    AFFIRMATIVE.contains(&normalized.as_str())
}

impl ConfirmationGate {
    /// Enter `Proposed` for a destructive action. Any earlier unanswered
    /// proposal is cancelled.
    pub fn propose(
        &mut self,
        operation: Operation,
        identifiers: Vec<String>,
        user: Option<String>,
    ) -> Proposal {
        if let Some((old, ConfirmState::Proposed)) = self.pending.take() {
            tracing::info!(token = %old.token, "superseded proposal cancelled");
        }
        self.seq += 1;
        let proposal = Proposal {
            token: ConfirmationToken {
                seq: self.seq,
                fingerprint: fingerprint(operation, &identifiers, user.as_deref()),
            },
            operation,
            identifiers,
            user,
        };
        tracing::info!(
            token = %proposal.token,
            operation = %operation,
            count = proposal.identifiers.len(),
            "destructive action proposed"
        );
        self.pending = Some((proposal.clone(), ConfirmState::Proposed));
        proposal
    }

    pub fn pending(&self) -> Option<&Proposal> {
        match &self.pending {
            Some((p, ConfirmState::Proposed)) => Some(p),
            _ => None,
        }
    }

    pub fn state(&self) -> Option<ConfirmState> {
        self.pending.as_ref().map(|(_, s)| *s)
    }

    /// Record the user's answer to the proposal identified by `token`.
    pub fn respond(&mut self, token: &ConfirmationToken, answer: &str) -> Result<Decision> {
        let proposal = match &self.pending {
            Some((p, ConfirmState::Proposed)) if &p.token == token => p.clone(),
            Some((p, ConfirmState::Proposed)) => {
                return Err(EnsueError::Confirmation(format!(
                    "answer is for {token}, but the pending action is {}",
                    p.token
                )))
            }
            _ => {
                return Err(EnsueError::Confirmation(
                    "no destructive action is awaiting confirmation".into(),
                ))
            }
        };

        if is_affirmative(answer) {
            tracing::info!(token = %token, "destructive action confirmed");
            self.pending = Some((proposal.clone(), ConfirmState::Confirmed));
            Ok(Decision::Confirmed(ConfirmedAction { proposal }))
        } else {
            tracing::info!(token = %token, "destructive action cancelled");
            self.pending = Some((proposal.clone(), ConfirmState::Cancelled));
            Ok(Decision::Cancelled(proposal))
        }
    }

    /// `Confirmed → Executed`. The action is consumed so it cannot run twice.
    pub fn mark_executed(&mut self, action: ConfirmedAction) -> Proposal {
        if let Some((p, state)) = &mut self.pending {
            if p.token == action.proposal.token {
                *state = ConfirmState::Executed;
            }
        }
        action.proposal
    }
}
