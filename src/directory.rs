//! Agent registry and message bus.
//!
//! The directory owns every agent. Messages are delivered in the order they
//! are sent; replies produced while handling a message are queued and
//! delivered after it. Every sent message is appended to a log, and a single
//! recording window can be opened over that log to capture what a phase sent.

use crate::agent::{Agent, AgentId, AgentKind, Government, Municipality};
use crate::message::{Message, MessageSummary, Recipients};
use anyhow::{Context, Result, bail, ensure};
use rand::prelude::*;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

/// Selection of agents; all set conditions must hold.
#[derive(Default)]
pub struct AgentFilter<'p> {
    pub kind: Option<AgentKind>,
    pub exclude: Option<AgentId>,
    pub only_voters: bool,
    pub predicate: Option<&'p dyn Fn(&Agent) -> bool>,
}

impl AgentFilter<'_> {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kind(kind: AgentKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn voters() -> Self {
        Self {
            only_voters: true,
            ..Self::default()
        }
    }

    fn matches(&self, agent: &Agent) -> bool {
        self.kind.is_none_or(|kind| agent.kind() == kind)
            && self.exclude != Some(agent.id())
            && (!self.only_voters || agent.is_voter())
            && self.predicate.is_none_or(|pred| pred(agent))
    }
}

#[derive(Debug, Default)]
pub struct Directory {
    agents: Vec<Agent>,
    index: BTreeMap<AgentId, usize>,
    log: Vec<Rc<Message>>,
    recording: Option<usize>,
    /// Number of successful deliveries so far.
    time: u64,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent to the catalogue.
    pub fn register(&mut self, agent: Agent) -> Result<AgentId> {
        let id = agent.id();
        ensure!(!self.index.contains_key(&id), "agent {id} registered twice");
        self.index.insert(id, self.agents.len());
        self.agents.push(agent);
        Ok(id)
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.index.get(&id).map(|&i_agent| &self.agents[i_agent])
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.index.get(&id).map(|&i_agent| &mut self.agents[i_agent])
    }

    /// Agents matching `filter`, in registration order.
    pub fn agents<'a>(
        &'a self,
        filter: &'a AgentFilter,
    ) -> impl Iterator<Item = &'a Agent> + 'a {
        self.agents.iter().filter(|agent| filter.matches(agent))
    }

    pub fn ids(&self, filter: &AgentFilter) -> Vec<AgentId> {
        self.agents(filter).map(Agent::id).collect()
    }

    pub fn all_agents(&mut self) -> impl Iterator<Item = &mut Agent> {
        self.agents.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    fn unique(&self, kind: AgentKind) -> Result<usize> {
        let mut found = self
            .agents
            .iter()
            .enumerate()
            .filter(|(_, agent)| agent.kind() == kind)
            .map(|(i_agent, _)| i_agent);
        let i_agent = found
            .next()
            .with_context(|| format!("no {kind} registered"))?;
        let n_extra = found.count();
        ensure!(n_extra == 0, "expected one {kind}, found {}", n_extra + 1);
        Ok(i_agent)
    }

    pub fn government_id(&self) -> Result<AgentId> {
        Ok(self.agents[self.unique(AgentKind::Government)?].id())
    }

    pub fn government(&self) -> Result<&Government> {
        let i_agent = self.unique(AgentKind::Government)?;
        self.agents[i_agent]
            .government()
            .context("government agent without government role")
    }

    pub fn government_mut(&mut self) -> Result<&mut Government> {
        let i_agent = self.unique(AgentKind::Government)?;
        self.agents[i_agent]
            .government_mut()
            .context("government agent without government role")
    }

    pub fn municipality_id(&self) -> Result<AgentId> {
        Ok(self.agents[self.unique(AgentKind::Municipality)?].id())
    }

    pub fn municipality(&self) -> Result<&Municipality> {
        let i_agent = self.unique(AgentKind::Municipality)?;
        self.agents[i_agent]
            .municipality()
            .context("municipality agent without municipality role")
    }

    pub fn municipality_mut(&mut self) -> Result<&mut Municipality> {
        let i_agent = self.unique(AgentKind::Municipality)?;
        self.agents[i_agent]
            .municipality_mut()
            .context("municipality agent without municipality role")
    }

    /// System time: the number of successful deliveries so far.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Deliver a message to its single target.
    ///
    /// Returns `false` if the target is not in the catalogue.
    ///
    /// # Errors
    /// Returns an error if the message is a broadcast, or if a recipient
    /// cannot handle a delivered message.
    pub fn send_message(&mut self, msg: Message, rng: &mut impl Rng) -> Result<bool> {
        ensure!(
            matches!(msg.meta().recipients, Recipients::Single(_)),
            "{} message sent as broadcast",
            msg.kind()
        );
        Ok(!self.dispatch(msg, rng)?.is_empty())
    }

    /// Deliver a message to each of its targets.
    ///
    /// Targets missing from the catalogue are skipped; the logged message only
    /// lists the reached ones, which are returned.
    pub fn broadcast_message(
        &mut self,
        msg: Message,
        rng: &mut impl Rng,
    ) -> Result<Vec<AgentId>> {
        ensure!(
            matches!(msg.meta().recipients, Recipients::Broadcast(_)),
            "{} message sent to a single target",
            msg.kind()
        );
        self.dispatch(msg, rng)
    }

    fn dispatch(&mut self, msg: Message, rng: &mut impl Rng) -> Result<Vec<AgentId>> {
        let mut queue = VecDeque::from([msg]);
        let mut first_reached = None;
        while let Some(msg) = queue.pop_front() {
            let reached = self.deliver(msg, &mut queue, rng)?;
            if first_reached.is_none() {
                first_reached = Some(reached);
            }
        }
        Ok(first_reached.unwrap_or_default())
    }

    fn deliver(
        &mut self,
        mut msg: Message,
        queue: &mut VecDeque<Message>,
        rng: &mut impl Rng,
    ) -> Result<Vec<AgentId>> {
        let reached: Vec<_> = msg
            .meta()
            .recipients
            .ids()
            .into_iter()
            .filter(|id| self.index.contains_key(id))
            .collect();
        if reached.is_empty() {
            log::trace!("{} from {} not delivered", msg.kind(), msg.source());
            return Ok(reached);
        }
        if matches!(msg.meta().recipients, Recipients::Broadcast(_)) {
            msg.set_recipients(Recipients::Broadcast(reached.clone()));
        }

        msg.set_timestamp(self.time);
        self.time += reached.len() as u64;
        let msg = Rc::new(msg);
        self.log.push(Rc::clone(&msg));
        log::trace!("t={} {} from {}", msg.meta().timestamp, msg.kind(), msg.source());

        let voters = self.ids(&AgentFilter::voters());
        for &id in &reached {
            let Some(agent) = self.agent_mut(id) else {
                continue;
            };
            let replies = agent
                .react(&msg, &voters, rng)
                .with_context(|| format!("{id} failed to handle {}", msg.kind()))?;
            queue.extend(replies);
        }
        Ok(reached)
    }

    /// Open the recording window at the current end of the message log.
    pub fn start_recording(&mut self) -> Result<()> {
        if self.recording.is_some() {
            bail!("a recording is already active");
        }
        self.recording = Some(self.log.len());
        Ok(())
    }

    /// Close the recording window and return the messages sent inside it.
    pub fn stop_recording(&mut self) -> Result<Vec<Rc<Message>>> {
        let start = self.recording.take().context("no recording is active")?;
        Ok(self.log[start..].to_vec())
    }

    pub fn label(&self, id: AgentId) -> String {
        match self.agent(id) {
            Some(agent) => agent.label(),
            None => id.to_string(),
        }
    }

    pub fn summarize(&self, msg: &Message) -> MessageSummary {
        MessageSummary {
            sender: self.label(msg.source()),
            recipients: msg
                .meta()
                .recipients
                .ids()
                .into_iter()
                .map(|id| self.label(id))
                .collect(),
            timestamp: msg.meta().timestamp,
            kind: msg.kind().to_string(),
            contents: msg.contents(),
        }
    }
}
