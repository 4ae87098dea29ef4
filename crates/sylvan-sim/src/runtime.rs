//! Tokio runtime: one task per agent, talking over unbounded channels.
//!
//! A shared in-flight counter is incremented before every post and
//! decremented once the receiving agent has dispatched everything the
//! message caused, so it only reaches zero when the network is quiet.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sylvan_graph::{AgentId, Problem};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::agent::{agents_for, Agent, AgentOutbox, Payload, Record};
use crate::config::SimulationConfig;
use crate::election::elect_roots;
use crate::error::{Error, Result};
use crate::report::Report;

struct Shared {
    senders: BTreeMap<AgentId, mpsc::UnboundedSender<Payload>>,
    records: mpsc::UnboundedSender<Record>,
    in_flight: AtomicUsize,
    delivered: AtomicUsize,
    max_steps: usize,
    done: watch::Sender<bool>,
}

impl Shared {
    fn post(&self, to: &AgentId, payload: Payload) -> Result<()> {
        let sender = self
            .senders
            .get(to)
            .ok_or_else(|| Error::UnknownAgent(to.clone()))?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if sender.send(payload).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Runtime(format!("mailbox of `{to}` is closed")));
        }
        Ok(())
    }

    fn dispatch(&self, from: &AgentId, out: AgentOutbox) -> Result<()> {
        for (to, payload) in out.sends {
            self.post(&to, payload)?;
        }
        for payload in out.deferred {
            self.post(from, payload)?;
        }
        for record in out.records {
            // the collector outlives every agent task
            let _ = self.records.send(record);
        }
        Ok(())
    }

    fn complete(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.stop();
        }
    }

    fn stop(&self) {
        let _ = self.done.send(true);
    }
}

async fn agent_task(
    mut agent: Agent,
    mut mailbox: mpsc::UnboundedReceiver<Payload>,
    shared: Arc<Shared>,
    mut done: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            Some(payload) = mailbox.recv() => {
                let step = shared.delivered.fetch_add(1, Ordering::SeqCst) + 1;
                if step > shared.max_steps {
                    warn!(agent = %agent.id(), max_steps = shared.max_steps, "Step limit reached");
                    shared.stop();
                    return Err(Error::StepLimit(shared.max_steps));
                }
                let handled = agent.handle(payload).and_then(|out| shared.dispatch(agent.id(), out));
                if let Err(e) = handled {
                    warn!(agent = %agent.id(), error = %e, "Agent failed");
                    shared.stop();
                    return Err(e);
                }
                shared.complete();
            }
            _ = done.changed() => {
                debug!(agent = %agent.id(), "Agent stopping");
                return Ok(());
            }
        }
    }
}

/// Run `problem` with one tokio task per agent until the network is quiet.
pub async fn run_async(problem: &Problem, config: &SimulationConfig) -> Result<Report> {
    let mut agents = agents_for(problem, config, None);
    info!(agents = agents.len(), variables = problem.variable_count(), "Starting agent tasks");

    let (done_tx, _) = watch::channel(false);
    let (records_tx, mut records_rx) = mpsc::unbounded_channel();
    let mut senders = BTreeMap::new();
    let mut mailboxes = BTreeMap::new();
    for id in agents.keys() {
        let (tx, rx) = mpsc::unbounded_channel();
        senders.insert(id.clone(), tx);
        // subscribed before any task can stop the run
        mailboxes.insert(id.clone(), (rx, done_tx.subscribe()));
    }
    let shared = Arc::new(Shared {
        senders,
        records: records_tx,
        in_flight: AtomicUsize::new(0),
        delivered: AtomicUsize::new(0),
        max_steps: config.max_steps,
        done: done_tx,
    });

    for (id, agent) in agents.iter_mut() {
        let out = agent.start()?;
        shared.dispatch(id, out)?;
    }
    if !config.parallel {
        for (to, msg) in elect_roots(problem, config.dfs.election) {
            shared.post(&to, Payload::Dfs(msg))?;
        }
    }

    let mut tasks = Vec::new();
    for (id, agent) in agents {
        let Some((mailbox, done)) = mailboxes.remove(&id) else {
            return Err(Error::UnknownAgent(id));
        };
        tasks.push(tokio::spawn(agent_task(agent, mailbox, Arc::clone(&shared), done)));
    }
    if shared.in_flight.load(Ordering::SeqCst) == 0 {
        shared.stop();
    }

    let mut first_error = None;
    for task in tasks {
        let result = task.await.map_err(|e| Error::Runtime(e.to_string())).and_then(|r| r);
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }
    let delivered = shared.delivered.load(Ordering::SeqCst);
    drop(shared);
    if let Some(e) = first_error {
        return Err(e);
    }

    let mut report = Report::new(problem, config);
    while let Some(record) = records_rx.recv().await {
        report.record(record);
    }
    report.steps = delivered;
    info!(steps = report.steps, outputs = report.outputs.len(), "Agent tasks finished");
    Ok(report)
}
