use std::fmt;
use std::sync::Arc;
use hashbrown::HashSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::storage::{ImageStore, StorageError};

/// A fixed length, randomly generated name for a stored image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

/// The ways the generator can fail to hand out an identifier.
#[derive(Debug, Error)]
pub enum IdentifierError {
    #[error("the identifier generator is no longer running")]
    Closed,

    #[error("all {0} possible identifiers are in use")]
    Exhausted(u128),

    #[error("failed to check identifier against the store: {0}")]
    Probe(#[from] StorageError),
}

/// The number of distinct identifiers of `length` characters drawn from
/// `symbols` characters, saturating at `u128::MAX`.
pub fn name_space(length: usize, symbols: usize) -> u128 {
    u32::try_from(length)
        .ok()
        .and_then(|exp| (symbols as u128).checked_pow(exp))
        .unwrap_or(u128::MAX)
}

/// Hands out identifiers that are not yet used by the bound store.
///
/// A single background task produces the identifiers and passes them
/// over a channel with room for one. The task reserves that slot before
/// generating, so exactly one result is ever waiting and the next is
/// only generated once it has been taken.
///
/// A failed store probe is handed to the caller that takes it rather
/// than retried, the following caller gets a fresh attempt.
pub struct IdentifierGenerator {
    receiver: Mutex<mpsc::Receiver<Result<Identifier, IdentifierError>>>,
    handle: JoinHandle<()>,
}

impl IdentifierGenerator {
    /// Starts the producer task.
    ///
    /// `alphabet` is expected to hold distinct characters.
    pub fn spawn(length: usize, alphabet: Vec<char>, store: Arc<dyn ImageStore>) -> Self {
        let producer = Producer {
            length,
            space: name_space(length, alphabet.len()),
            alphabet,
            store,
            issued: HashSet::new(),
            taken: HashSet::new(),
            rng: StdRng::from_entropy(),
        };

        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(producer.run(tx));

        Self {
            receiver: Mutex::new(rx),
            handle,
        }
    }

    /// Waits for the next free identifier.
    pub async fn get(&self) -> Result<Identifier, IdentifierError> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await.unwrap_or(Err(IdentifierError::Closed))
    }

    /// Stops the background task, any pending or later `get` calls
    /// return `IdentifierError::Closed`.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for IdentifierGenerator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Producer {
    length: usize,
    alphabet: Vec<char>,
    space: u128,
    store: Arc<dyn ImageStore>,

    /// Identifiers handed out, these may not have reached the store yet.
    issued: HashSet<String>,

    /// Candidates the store reported as already in use.
    taken: HashSet<String>,
    rng: StdRng,
}

impl Producer {
    async fn run(mut self, tx: mpsc::Sender<Result<Identifier, IdentifierError>>) {
        loop {
            let permit = match tx.reserve().await {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("Identifier receiver dropped, stopping generator");
                    return;
                },
            };

            let next = self.next_free().await;
            permit.send(next);
        }
    }

    async fn next_free(&mut self) -> Result<Identifier, IdentifierError> {
        loop {
            if (self.issued.len() + self.taken.len()) as u128 >= self.space {
                warn!("Every {} character identifier is in use", self.length);
                return Err(IdentifierError::Exhausted(self.space));
            }

            let candidate = self.candidate();
            if self.issued.contains(&candidate) || self.taken.contains(&candidate) {
                tokio::task::yield_now().await;
                continue;
            }

            match self.store.exists(&candidate).await {
                Ok(false) => {
                    self.issued.insert(candidate.clone());
                    return Ok(Identifier(candidate));
                },
                Ok(true) => {
                    debug!("Identifier {} is already in use, regenerating", &candidate);
                    self.taken.insert(candidate);
                    tokio::task::yield_now().await;
                },
                Err(e) => {
                    warn!("Failed to check identifier {} against the store: {}", &candidate, e);
                    return Err(e.into());
                },
            }
        }
    }

    fn candidate(&mut self) -> String {
        (0..self.length)
            .map(|_| self.alphabet[self.rng.gen_range(0..self.alphabet.len())])
            .collect()
    }
}
