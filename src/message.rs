use crate::agent::AgentId;
use crate::plan::{CoastalPlan, Vote};
use crate::world::Pos;
use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Addressees of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Recipients {
    Single(AgentId),
    Broadcast(Vec<AgentId>),
}

impl Recipients {
    pub fn ids(&self) -> Vec<AgentId> {
        match self {
            Recipients::Single(id) => vec![*id],
            Recipients::Broadcast(ids) => ids.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetaInfo {
    pub source: AgentId,
    pub recipients: Recipients,
    /// System time at which the message was sent; set by the directory.
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Inform(String),
    AquacultureSpawned { cell: Pos },
    TaxPayment { amount: f64 },
    PlanHearing { plan: Rc<CoastalPlan> },
    VoteResponse { reply_to: Rc<Message>, votes: Vec<Vote> },
    VoteResponseInform { reply_to: Rc<Message> },
}

/// Immutable message envelope exchanged through the directory.
#[derive(Debug, Clone)]
pub struct Message {
    meta: MetaInfo,
    payload: Payload,
}

impl Message {
    fn new(source: AgentId, recipients: Recipients, payload: Payload) -> Self {
        Self {
            meta: MetaInfo {
                source,
                recipients,
                timestamp: 0,
            },
            payload,
        }
    }

    pub fn inform(source: AgentId, target: AgentId, text: String) -> Self {
        Self::new(source, Recipients::Single(target), Payload::Inform(text))
    }

    pub fn aquaculture_spawned(source: AgentId, targets: Vec<AgentId>, cell: Pos) -> Self {
        Self::new(
            source,
            Recipients::Broadcast(targets),
            Payload::AquacultureSpawned { cell },
        )
    }

    pub fn tax_payment(source: AgentId, target: AgentId, amount: f64) -> Self {
        Self::new(
            source,
            Recipients::Single(target),
            Payload::TaxPayment { amount },
        )
    }

    pub fn plan_hearing(source: AgentId, targets: Vec<AgentId>, plan: Rc<CoastalPlan>) -> Self {
        Self::new(
            source,
            Recipients::Broadcast(targets),
            Payload::PlanHearing { plan },
        )
    }

    /// Answer a plan hearing with a list of votes.
    ///
    /// # Errors
    /// Returns an error if `reply_to` is not a plan hearing.
    pub fn vote_response(
        source: AgentId,
        target: AgentId,
        reply_to: Rc<Message>,
        votes: Vec<Vote>,
    ) -> Result<Self> {
        ensure!(
            matches!(reply_to.payload, Payload::PlanHearing { .. }),
            "vote response must reply to a plan hearing, not to {}",
            reply_to.kind()
        );
        Ok(Self::new(
            source,
            Recipients::Single(target),
            Payload::VoteResponse { reply_to, votes },
        ))
    }

    /// Forward the votes of a received vote response to `targets`.
    ///
    /// # Errors
    /// Returns an error if `reply_to` is not a vote response.
    pub fn vote_response_inform(
        source: AgentId,
        targets: Vec<AgentId>,
        reply_to: Rc<Message>,
    ) -> Result<Self> {
        ensure!(
            matches!(reply_to.payload, Payload::VoteResponse { .. }),
            "vote response inform must reply to a vote response, not to {}",
            reply_to.kind()
        );
        Ok(Self::new(
            source,
            Recipients::Broadcast(targets),
            Payload::VoteResponseInform { reply_to },
        ))
    }

    pub fn meta(&self) -> &MetaInfo {
        &self.meta
    }

    pub fn source(&self) -> AgentId {
        self.meta.source
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: u64) {
        self.meta.timestamp = timestamp;
    }

    pub(crate) fn set_recipients(&mut self, recipients: Recipients) {
        self.meta.recipients = recipients;
    }

    /// Votes carried by a vote response.
    pub fn votes(&self) -> Option<&[Vote]> {
        match &self.payload {
            Payload::VoteResponse { votes, .. } => Some(votes),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            Payload::Inform(_) => "Inform",
            Payload::AquacultureSpawned { .. } => "AquacultureSpawned",
            Payload::TaxPayment { .. } => "TaxPayment",
            Payload::PlanHearing { .. } => "PlanHearing",
            Payload::VoteResponse { .. } => "VoteResponse",
            Payload::VoteResponseInform { .. } => "VoteResponseInform",
        }
    }

    /// Human readable description of the payload.
    pub fn contents(&self) -> String {
        match &self.payload {
            Payload::Inform(text) => text.clone(),
            Payload::AquacultureSpawned { cell } => format!("aquaculture spawned at {cell}"),
            Payload::TaxPayment { amount } => format!("tax payment of {amount:.2}"),
            Payload::PlanHearing { plan } => format!(
                "plan with {} aquaculture sites and {} reserved zones",
                plan.aquaculture_sites().len(),
                plan.reserved_zones().len()
            ),
            Payload::VoteResponse { votes, .. } => {
                let n_complaints = votes.iter().filter(|v| v.is_complaint()).count();
                format!("{n_complaints} complaints")
            }
            Payload::VoteResponseInform { reply_to } => {
                format!("votes of {} forwarded", reply_to.source())
            }
        }
    }
}

/// Report form of a sent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub sender: String,
    pub recipients: Vec<String>,
    pub timestamp: u64,
    pub kind: String,
    pub contents: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_must_match_the_protocol() {
        let gov = AgentId::new(0);
        let fisher = AgentId::new(2);
        let hearing = Rc::new(Message::plan_hearing(
            AgentId::new(1),
            vec![fisher],
            Rc::new(CoastalPlan::new()),
        ));
        let inform = Rc::new(Message::inform(gov, fisher, "hello".to_string()));

        assert!(Message::vote_response(fisher, gov, inform.clone(), Vec::new()).is_err());
        let response = Rc::new(
            Message::vote_response(fisher, gov, hearing.clone(), vec![Vote::complaint(
                Pos::new(1, 1),
            )])
            .unwrap(),
        );
        assert_eq!(response.votes().map(<[Vote]>::len), Some(1));
        assert_eq!(response.contents(), "1 complaints");

        assert!(Message::vote_response_inform(gov, vec![fisher], hearing).is_err());
        let forward = Message::vote_response_inform(gov, vec![fisher], response).unwrap();
        assert_eq!(forward.kind(), "VoteResponseInform");
        assert_eq!(forward.meta().recipients.ids(), vec![fisher]);
    }
}
