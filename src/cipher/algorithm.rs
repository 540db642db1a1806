//! Version-keyed cipher algorithms.
//!
//! A [`CipherAlgorithm`] bundles everything a rolling cipher needs that does not change
//! per connection: the shuffle table, the initial seed, the AES key schedule and the
//! transform kind. Algorithms are resolved by protocol version through an
//! [`AlgorithmRegistry`] built once at startup and handed to sessions behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::aes_ofb::{AesOfb, DEFAULT_AES_KEY};
use super::legacy;
use super::shuffle::shuffle;
use super::table::{CipherTable, InitialSeed, Iv};
use crate::error::{ProtocolError, Result};

/// First protocol version that dropped the legacy rotation cipher.
pub const LEGACY_CUTOFF_VERSION: u16 = 118;

/// Stream transform applied to each packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// AES-OFB keystream only
    Aes,
    /// Legacy rotation cipher under the AES-OFB keystream
    AesWithLegacy,
}

impl TransformKind {
    /// Transform used by stock clients of `version`
    pub fn for_version(version: u16) -> Self {
        if version < LEGACY_CUTOFF_VERSION {
            TransformKind::AesWithLegacy
        } else {
            TransformKind::Aes
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TransformKind::Aes => "aes-ofb",
            TransformKind::AesWithLegacy => "aes-ofb+legacy",
        }
    }
}

/// Immutable, cheaply cloneable cipher parameters for one protocol version.
#[derive(Debug, Clone)]
pub struct CipherAlgorithm {
    table: Arc<CipherTable>,
    seed: InitialSeed,
    kind: TransformKind,
    aes: Arc<AesOfb>,
}

impl CipherAlgorithm {
    pub fn new(table: CipherTable, seed: InitialSeed, kind: TransformKind, aes_key: &[u8; 32]) -> Self {
        Self {
            table: Arc::new(table),
            seed,
            kind,
            aes: Arc::new(AesOfb::new(aes_key)),
        }
    }

    /// Build an algorithm from raw table and seed bytes with the stock AES key.
    ///
    /// # Errors
    /// `InvalidTableLength` unless `table` is 256 bytes, `InvalidIvLength` unless `seed`
    /// is 4 bytes.
    pub fn from_parts(table: &[u8], seed: &[u8], kind: TransformKind) -> Result<Self> {
        let table = CipherTable::from_slice(table)?;
        let seed = InitialSeed::from_slice(seed)?;
        Ok(Self::new(table, seed, kind, &DEFAULT_AES_KEY))
    }

    /// Stock table, seed and key with the given transform
    pub fn standard(kind: TransformKind) -> Self {
        Self::new(
            CipherTable::default(),
            InitialSeed::default(),
            kind,
            &DEFAULT_AES_KEY,
        )
    }

    /// Same table, seed and key schedule with a different transform.
    fn with_kind(&self, kind: TransformKind) -> Self {
        Self {
            table: Arc::clone(&self.table),
            seed: self.seed,
            kind,
            aes: Arc::clone(&self.aes),
        }
    }

    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    pub fn table(&self) -> &CipherTable {
        &self.table
    }

    pub fn seed(&self) -> &InitialSeed {
        &self.seed
    }

    /// Advance an IV by one step.
    #[inline]
    pub fn next_iv(&self, iv: &Iv) -> Iv {
        shuffle(self.table.as_bytes(), self.seed.as_bytes(), iv)
    }

    /// Encrypt a payload in place under `iv`. Does not advance the IV.
    pub fn encrypt(&self, iv: &Iv, data: &mut [u8]) {
        if self.kind == TransformKind::AesWithLegacy {
            legacy::encrypt(data);
        }
        self.aes.apply(iv, data);
    }

    /// Decrypt a payload in place under `iv`. Does not advance the IV.
    pub fn decrypt(&self, iv: &Iv, data: &mut [u8]) {
        self.aes.apply(iv, data);
        if self.kind == TransformKind::AesWithLegacy {
            legacy::decrypt(data);
        }
    }
}

/// Lookup from negotiated protocol version to cipher algorithm.
///
/// Populated before any session starts and read-only afterwards, so sessions share it
/// through an `Arc` without locking.
#[derive(Debug, Default, Clone)]
pub struct AlgorithmRegistry {
    algorithms: HashMap<u16, CipherAlgorithm>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry covering `versions` with the stock table, seed and key.
    /// All entries share a single table and key schedule.
    pub fn standard<I>(versions: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        let base = CipherAlgorithm::standard(TransformKind::Aes);
        let mut registry = Self::new();
        for version in versions {
            let algorithm = base.with_kind(TransformKind::for_version(version));
            registry.algorithms.entry(version).or_insert(algorithm);
        }
        registry
    }

    /// Register the algorithm for a version.
    ///
    /// # Errors
    /// `DuplicateVersion` if the version already has an algorithm.
    pub fn register(&mut self, version: u16, algorithm: CipherAlgorithm) -> Result<()> {
        if self.algorithms.contains_key(&version) {
            return Err(ProtocolError::DuplicateVersion(version));
        }
        debug!(version, kind = algorithm.kind().name(), "Registered cipher algorithm");
        self.algorithms.insert(version, algorithm);
        Ok(())
    }

    /// Resolve the algorithm for a negotiated version.
    ///
    /// # Errors
    /// `UnsupportedVersion` if nothing is registered for `version`.
    pub fn resolve(&self, version: u16) -> Result<CipherAlgorithm> {
        self.algorithms
            .get(&version)
            .cloned()
            .ok_or(ProtocolError::UnsupportedVersion(version))
    }

    pub fn supports(&self, version: u16) -> bool {
        self.algorithms.contains_key(&version)
    }

    pub fn len(&self) -> usize {
        self.algorithms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }
}
