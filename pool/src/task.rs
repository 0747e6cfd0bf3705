//! Units of work accepted by the tracked pool, and their results.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use noisefs_types::{Address, Block, NoiseError, Result};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Capabilities a task can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Xor,
    Store,
    Retrieve,
    GenerateRandomizer,
}

/// The inputs for one unit of work. Tasks are pure functions of these
/// inputs plus the gateway and randomizer-source handles the pool holds.
#[derive(Debug)]
pub enum TaskWork {
    Xor {
        data: Block,
        rand1: Block,
        rand2: Block,
    },
    Store {
        block: Block,
    },
    Retrieve {
        address: Address,
    },
    Generate {
        size: usize,
    },
}

impl TaskWork {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskWork::Xor { .. } => TaskKind::Xor,
            TaskWork::Store { .. } => TaskKind::Store,
            TaskWork::Retrieve { .. } => TaskKind::Retrieve,
            TaskWork::Generate { .. } => TaskKind::GenerateRandomizer,
        }
    }
}

/// A unit of work identified by a stable string ID.
#[derive(Debug)]
pub struct Task {
    pub id: String,
    pub work: TaskWork,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) respond: Option<oneshot::Sender<Result<TaskValue>>>,
}

impl Task {
    pub fn new(id: impl Into<String>, work: TaskWork) -> Self {
        Task {
            id: id.into(),
            work,
            cancel: None,
            respond: None,
        }
    }

    pub(crate) fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn with_responder(
        mut self,
        responder: oneshot::Sender<Result<TaskValue>>,
    ) -> Self {
        self.respond = Some(responder);
        self
    }
}

/// The typed value a finished task produced.
#[derive(Clone, Debug)]
pub enum TaskValue {
    Block(Block),
    Address(Address),
}

impl TaskValue {
    pub fn into_block(self) -> Result<Block> {
        match self {
            TaskValue::Block(block) => Ok(block),
            TaskValue::Address(addr) => Err(NoiseError::backend(std::io::Error::other(
                format!("expected a block result, got address {}", addr.to_base64()),
            ))),
        }
    }

    pub fn into_address(self) -> Result<Address> {
        match self {
            TaskValue::Address(addr) => Ok(addr),
            TaskValue::Block(_) => Err(NoiseError::backend(std::io::Error::other(
                "expected an address result, got a block",
            ))),
        }
    }
}

/// Outcome of one task: the originating ID, its capability, the typed value
/// or error, and the measured execution time.
#[derive(Debug)]
pub struct TaskResult {
    pub id: String,
    pub kind: TaskKind,
    pub outcome: Result<TaskValue>,
    pub duration: Duration,
}

/// Live counters for a tracked pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub(crate) submitted: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        let submitted = self.submitted.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        PoolStatsSnapshot {
            submitted,
            completed,
            failed,
            pending: submitted.saturating_sub(completed + failed),
        }
    }

}
