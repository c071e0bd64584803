//! In-process process group
//!
//! Hosts `p` ranks on a rayon thread pool of exactly `p` threads. Each rank
//! runs the SPMD closure once on its own thread and owns a mailbox; messages
//! are moved between mailboxes, never shared.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::comm::{Communicator, Payload};
use crate::error::{Result, SetupError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectiveOp {
    Broadcast,
    Scatter,
    AllToAllV,
    Barrier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Point(u32),
    Collective { seq: u64, op: CollectiveOp },
}

struct Message {
    source: usize,
    tag: Tag,
    payload: Box<dyn Any + Send>,
}

enum Envelope {
    Message(Message),
    Abort { origin: usize },
}

/// Communicator of one rank in a [`LocalGroup`]
pub struct LocalComm {
    rank: usize,
    size: usize,
    outboxes: Arc<Vec<Sender<Envelope>>>,
    inbox: Receiver<Envelope>,
    /// Messages that arrived before anyone asked for them
    pending: RefCell<VecDeque<Message>>,
    next_seq: Cell<u64>,
    aborted: Cell<Option<usize>>,
}

impl LocalComm {
    fn new(rank: usize, size: usize, outboxes: Arc<Vec<Sender<Envelope>>>, inbox: Receiver<Envelope>) -> Self {
        Self {
            rank,
            size,
            outboxes,
            inbox,
            pending: RefCell::new(VecDeque::new()),
            next_seq: Cell::new(0),
            aborted: Cell::new(None),
        }
    }

    fn collective_tag(&self, op: CollectiveOp) -> Tag {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        Tag::Collective { seq, op }
    }

    fn check_alive(&self) -> Result<()> {
        match self.aborted.get() {
            Some(origin) => Err(SetupError::Aborted { origin }),
            None => Ok(()),
        }
    }

    fn check_rank(&self, rank: usize, what: &str) -> Result<()> {
        if rank < self.size {
            Ok(())
        } else {
            Err(SetupError::protocol(
                self.rank,
                format!("{} rank {} outside group of {}", what, rank, self.size),
            ))
        }
    }

    fn post(&self, dest: usize, tag: Tag, payload: Box<dyn Any + Send>) -> Result<()> {
        self.check_alive()?;
        tracing::trace!(rank = self.rank, dest, ?tag, "post");
        self.outboxes[dest]
            .send(Envelope::Message(Message {
                source: self.rank,
                tag,
                payload,
            }))
            .map_err(|_| SetupError::protocol(self.rank, format!("rank {} has left the group", dest)))
    }

    /// A collective message from `source` that is not the one expected means
    /// the two processes disagree on the sequence of collectives.
    fn conflicts(&self, message: &Message, source: usize, expected: Tag) -> bool {
        message.source == source
            && matches!(message.tag, Tag::Collective { .. })
            && matches!(expected, Tag::Collective { .. })
            && message.tag != expected
    }

    fn mismatch(&self, message: &Message, expected: Tag) -> SetupError {
        SetupError::protocol(
            self.rank,
            format!(
                "expected {:?} from rank {}, got {:?}",
                expected, message.source, message.tag
            ),
        )
    }

    fn take(&self, source: usize, tag: Tag) -> Result<Box<dyn Any + Send>> {
        self.check_alive()?;

        {
            let mut pending = self.pending.borrow_mut();
            if let Some(pos) = pending.iter().position(|m| m.source == source && m.tag == tag) {
                if let Some(message) = pending.remove(pos) {
                    return Ok(message.payload);
                }
            }
            if let Some(message) = pending.iter().find(|m| self.conflicts(m, source, tag)) {
                return Err(self.mismatch(message, tag));
            }
        }

        loop {
            match self.inbox.recv() {
                Err(_) => return Err(SetupError::protocol(self.rank, "mailbox closed")),
                Ok(Envelope::Abort { origin }) => {
                    self.aborted.set(Some(origin));
                    return Err(SetupError::Aborted { origin });
                }
                Ok(Envelope::Message(message)) => {
                    if message.source == source && message.tag == tag {
                        return Ok(message.payload);
                    }
                    if self.conflicts(&message, source, tag) {
                        return Err(self.mismatch(&message, tag));
                    }
                    self.pending.borrow_mut().push_back(message);
                }
            }
        }
    }

    fn downcast<T: 'static>(&self, payload: Box<dyn Any + Send>) -> Result<T> {
        payload.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
            SetupError::protocol(
                self.rank,
                format!("unexpected payload, expected {}", std::any::type_name::<T>()),
            )
        })
    }

    fn signal_abort(&self) {
        if self.aborted.get().is_none() {
            self.aborted.set(Some(self.rank));
        }
        for (q, outbox) in self.outboxes.iter().enumerate() {
            if q != self.rank {
                // A rank that already finished no longer listens
                let _ = outbox.send(Envelope::Abort { origin: self.rank });
            }
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send<T: Payload>(&self, dest: usize, tag: u32, data: Vec<T>) -> Result<()> {
        self.check_rank(dest, "destination")?;
        self.post(dest, Tag::Point(tag), Box::new(data))
    }

    fn recv<T: Payload>(&self, source: usize, tag: u32) -> Result<Vec<T>> {
        self.check_rank(source, "source")?;
        let payload = self.take(source, Tag::Point(tag))?;
        self.downcast(payload)
    }

    fn broadcast<T: Payload + Clone>(&self, value: Option<T>, root: usize) -> Result<T> {
        self.check_rank(root, "root")?;
        let tag = self.collective_tag(CollectiveOp::Broadcast);

        if self.rank == root {
            let value = value.ok_or_else(|| SetupError::protocol(self.rank, "broadcast root has no value"))?;
            for q in (0..self.size).filter(|&q| q != root) {
                self.post(q, tag, Box::new(value.clone()))?;
            }
            Ok(value)
        } else {
            let payload = self.take(root, tag)?;
            self.downcast(payload)
        }
    }

    fn scatter<T: Payload>(&self, chunks: Option<Vec<Vec<T>>>, root: usize) -> Result<Vec<T>> {
        self.check_rank(root, "root")?;
        let tag = self.collective_tag(CollectiveOp::Scatter);

        if self.rank == root {
            let chunks = chunks.ok_or_else(|| SetupError::protocol(self.rank, "scatter root has no data"))?;
            if chunks.len() != self.size {
                return Err(SetupError::protocol(
                    self.rank,
                    format!("scatter needs {} chunks, got {}", self.size, chunks.len()),
                ));
            }
            let mut mine = Vec::new();
            for (q, chunk) in chunks.into_iter().enumerate() {
                if q == root {
                    mine = chunk;
                } else {
                    self.post(q, tag, Box::new(chunk))?;
                }
            }
            Ok(mine)
        } else {
            let payload = self.take(root, tag)?;
            self.downcast(payload)
        }
    }

    fn all_to_allv<T: Payload>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>> {
        if outgoing.len() != self.size {
            return Err(SetupError::protocol(
                self.rank,
                format!("all_to_allv needs {} chunks, got {}", self.size, outgoing.len()),
            ));
        }
        let tag = self.collective_tag(CollectiveOp::AllToAllV);

        let mut mine = Vec::new();
        for (q, chunk) in outgoing.into_iter().enumerate() {
            if q == self.rank {
                mine = chunk;
            } else {
                self.post(q, tag, Box::new(chunk))?;
            }
        }

        let mut incoming = Vec::with_capacity(self.size);
        for q in 0..self.size {
            if q == self.rank {
                incoming.push(std::mem::take(&mut mine));
            } else {
                let payload = self.take(q, tag)?;
                incoming.push(self.downcast(payload)?);
            }
        }
        Ok(incoming)
    }

    fn barrier(&self) -> Result<()> {
        let tag = self.collective_tag(CollectiveOp::Barrier);

        if self.rank == 0 {
            for q in 1..self.size {
                self.take(q, tag)?;
            }
            for q in 1..self.size {
                self.post(q, tag, Box::new(()))?;
            }
        } else {
            self.post(0, tag, Box::new(()))?;
            self.take(0, tag)?;
        }
        Ok(())
    }

    fn abort(&self, error: &SetupError) {
        tracing::error!(rank = self.rank, code = error.abort_code(), %error, "aborting process group");
        self.signal_abort();
    }
}

/// Aborts the group if the rank's closure panics
struct AbortOnPanic<'a> {
    comm: &'a LocalComm,
}

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.comm.signal_abort();
        }
    }
}

/// A group of ranks running in this OS process
pub struct LocalGroup {
    size: usize,
    pool: ThreadPool,
}

impl LocalGroup {
    /// Creates a group of `size` ranks
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(SetupError::InvalidConfig("a process group needs at least one rank".to_string()));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("rank-{}", i))
            .build()
            .map_err(|e| SetupError::InvalidConfig(format!("cannot start {} ranks: {}", size, e)))?;

        Ok(Self { size, pool })
    }

    /// Number of ranks
    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `op` once on every rank and collects the results in rank order
    ///
    /// A rank that fails aborts the whole group. The returned error is the
    /// root cause, not the `Aborted` notifications seen by the other ranks.
    pub fn run<R, F>(&self, op: F) -> Result<Vec<R>>
    where
        F: Fn(&LocalComm) -> Result<R> + Sync,
        R: Send,
    {
        let size = self.size;
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| channel()).unzip();
        let outboxes = Arc::new(senders);
        let comms: Vec<Mutex<Option<LocalComm>>> = receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Mutex::new(Some(LocalComm::new(rank, size, Arc::clone(&outboxes), inbox))))
            .collect();

        let results: Vec<Result<R>> = self.pool.broadcast(|ctx| {
            let rank = ctx.index();
            let comm = comms[rank].lock().ok().and_then(|mut slot| slot.take());
            let Some(comm) = comm else {
                for outbox in outboxes.iter() {
                    let _ = outbox.send(Envelope::Abort { origin: rank });
                }
                return Err(SetupError::protocol(rank, "rank started twice"));
            };

            let _guard = AbortOnPanic { comm: &comm };
            let result = op(&comm);
            if let Err(error) = &result {
                if !error.is_abort() {
                    comm.abort(error);
                }
            }
            result
        });

        let mut values = Vec::with_capacity(size);
        let mut first_abort = None;
        let mut root_cause = None;
        for result in results {
            match result {
                Ok(value) => values.push(value),
                Err(error) if error.is_abort() => {
                    first_abort.get_or_insert(error);
                }
                Err(error) => {
                    root_cause.get_or_insert(error);
                }
            }
        }

        match root_cause.or(first_abort) {
            Some(error) => Err(error),
            None => Ok(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranks_and_broadcast() {
        let group = LocalGroup::new(4).unwrap();
        let results = group
            .run(|comm| {
                let value = if comm.rank() == 2 { Some(42usize) } else { None };
                let v = comm.broadcast(value, 2)?;
                Ok((comm.rank(), comm.size(), v))
            })
            .unwrap();

        assert_eq!(results, vec![(0, 4, 42), (1, 4, 42), (2, 4, 42), (3, 4, 42)]);
    }

    #[test]
    fn test_scatter_and_all_to_allv() {
        let group = LocalGroup::new(3).unwrap();
        let results = group
            .run(|comm| {
                let chunks = comm
                    .is_root(0)
                    .then(|| vec![vec![0usize], vec![10, 11], vec![20, 21, 22]]);
                let mine = comm.scatter(chunks, 0)?;

                // Send (my rank, dest) to every process
                let outgoing: Vec<Vec<(usize, usize)>> =
                    (0..comm.size()).map(|q| vec![(comm.rank(), q)]).collect();
                let incoming = comm.all_to_allv(outgoing)?;
                Ok((mine, incoming))
            })
            .unwrap();

        assert_eq!(results[1].0, vec![10, 11]);
        assert_eq!(results[2].0, vec![20, 21, 22]);
        for (rank, (_, incoming)) in results.iter().enumerate() {
            let expected: Vec<Vec<(usize, usize)>> = (0..3).map(|q| vec![(q, rank)]).collect();
            assert_eq!(incoming, &expected);
        }
    }

    #[test]
    fn test_point_to_point_order() {
        let group = LocalGroup::new(2).unwrap();
        let results = group
            .run(|comm| {
                if comm.rank() == 0 {
                    comm.send(1, 7, vec![1.0f64])?;
                    comm.send(1, 3, vec![3u32])?;
                    comm.send(1, 7, vec![2.0f64])?;
                    Ok(Vec::new())
                } else {
                    // Tags are matched independently of arrival order
                    let b: Vec<u32> = comm.recv(0, 3)?;
                    let a: Vec<f64> = comm.recv(0, 7)?;
                    let c: Vec<f64> = comm.recv(0, 7)?;
                    Ok(vec![a[0], b[0] as f64, c[0]])
                }
            })
            .unwrap();

        assert_eq!(results[1], vec![1.0, 3.0, 2.0]);
    }

    #[test]
    fn test_failure_aborts_group() {
        let group = LocalGroup::new(3).unwrap();
        let result = group.run(|comm| {
            if comm.rank() == 1 {
                return Err(SetupError::NonSquareMatrix { rows: 1, cols: 2 });
            }
            comm.barrier()?;
            Ok(())
        });

        match result {
            Err(SetupError::NonSquareMatrix { rows: 1, cols: 2 }) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_skipped_collective_is_detected() {
        let group = LocalGroup::new(2).unwrap();
        let result = group.run(|comm| {
            if comm.rank() == 0 {
                comm.broadcast(Some(1usize), 0)?;
            }
            let chunks = comm.is_root(0).then(|| vec![vec![1usize], vec![2]]);
            comm.scatter(chunks, 0)
        });

        assert!(matches!(result, Err(SetupError::ProtocolViolation { rank: 1, .. })));
    }

    #[test]
    fn test_zero_ranks_rejected() {
        assert!(matches!(LocalGroup::new(0), Err(SetupError::InvalidConfig(_))));
    }
}
