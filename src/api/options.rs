use std::convert::TryFrom;
use tokio::time::Duration;

/// Tunable timing and storage knobs. Anything left `None` takes the
/// default. Mainly exists so tests can run the protocols at millisecond
/// scale.
#[derive(Clone, Default)]
pub struct PeerOptions {
    /// Upper bound of the random delay before answering a PUTCHUNK with
    /// STORED.
    pub stored_reply_jitter_max: Option<Duration>,
    /// Upper bound of the random delay before answering a GETCHUNK with
    /// CHUNK.
    pub chunk_reply_jitter_max: Option<Duration>,
    /// Upper bound of the random delay before re-replicating an
    /// under-replicated chunk after a REMOVED.
    pub rebackup_jitter_max: Option<Duration>,
    /// First PUTCHUNK round's wait for STORED replies. Doubles each retry.
    pub backup_initial_backoff: Option<Duration>,
    /// PUTCHUNK rounds per chunk before giving up on the desired degree.
    pub backup_max_attempts: Option<u32>,
    /// How long a restore waits for all chunks before reporting partial
    /// progress.
    pub restore_timeout: Option<Duration>,
    /// How often replication state is persisted to disk.
    pub snapshot_interval: Option<Duration>,
    /// Local storage capacity in bytes.
    pub storage_capacity: Option<u64>,
}

#[derive(Clone)]
pub(crate) struct PeerOptionsValidated {
    pub stored_reply_jitter_max: Duration,
    pub chunk_reply_jitter_max: Duration,
    pub rebackup_jitter_max: Duration,
    pub backup_initial_backoff: Duration,
    pub backup_max_attempts: u32,
    pub restore_timeout: Duration,
    pub snapshot_interval: Duration,
    pub storage_capacity: u64,
}

impl PeerOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.backup_max_attempts == 0 {
            return Err("Backup must make at least one attempt");
        }
        if self.stored_reply_jitter_max >= self.backup_initial_backoff {
            return Err("STORED reply jitter must be less than the initial backup backoff");
        }
        if self.chunk_reply_jitter_max >= self.restore_timeout {
            return Err("CHUNK reply jitter must be less than the restore timeout");
        }

        Ok(())
    }
}

impl TryFrom<PeerOptions> for PeerOptionsValidated {
    type Error = &'static str;

    fn try_from(options: PeerOptions) -> Result<Self, Self::Error> {
        let values = PeerOptionsValidated {
            stored_reply_jitter_max: options.stored_reply_jitter_max.unwrap_or(Duration::from_millis(400)),
            chunk_reply_jitter_max: options.chunk_reply_jitter_max.unwrap_or(Duration::from_millis(400)),
            rebackup_jitter_max: options.rebackup_jitter_max.unwrap_or(Duration::from_millis(400)),
            backup_initial_backoff: options.backup_initial_backoff.unwrap_or(Duration::from_millis(500)),
            backup_max_attempts: options.backup_max_attempts.unwrap_or(5),
            restore_timeout: options.restore_timeout.unwrap_or(Duration::from_secs(30)),
            snapshot_interval: options.snapshot_interval.unwrap_or(Duration::from_secs(30)),
            storage_capacity: options.storage_capacity.unwrap_or(8_000_000),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(PeerOptionsValidated::try_from(PeerOptions::default()).is_ok());
    }

    #[test]
    fn stored_jitter_must_undercut_backoff() {
        let options = PeerOptions {
            stored_reply_jitter_max: Some(Duration::from_millis(600)),
            backup_initial_backoff: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        assert!(PeerOptionsValidated::try_from(options).is_err());
    }
}
