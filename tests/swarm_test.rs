use chunkmesh::{
    Channel, FileId, InboundDatagram, LoopbackNetwork, Message, PeerConfig, PeerHandle, PeerId, PeerOptions,
    ProtocolVersion, Transport, CHUNK_SIZE,
};
use slog::Drain;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

#[tokio::test]
async fn backup_restore_round_trip() -> Result<(), Box<dyn Error>> {
    let mut swarm = Swarm::create("round_trip", 4, "1.0");

    // Empty, exact multiple (gains a trailing empty chunk), one byte over,
    // and a multi-chunk file with a remainder.
    for (name, size) in [
        ("empty.bin", 0),
        ("exact.bin", CHUNK_SIZE),
        ("over.bin", CHUNK_SIZE + 1),
        ("big.bin", 10 * CHUNK_SIZE + 37),
    ]
    .iter()
    {
        let path = swarm.write_subject_file(name, *size);
        swarm.peers[0].backup(&path, 2).await?;

        let restored_path = swarm.peers[0].restore(&path).await?;
        let original = fs::read(&path)?;
        let restored = fs::read(&restored_path)?;
        assert_eq!(original.len(), restored.len(), "size mismatch for {}", name);
        assert_eq!(original, restored, "content mismatch for {}", name);
    }

    Ok(())
}

#[tokio::test]
async fn enhanced_backup_restore_round_trip() -> Result<(), Box<dyn Error>> {
    let mut swarm = Swarm::create("enhanced_round_trip", 3, "1.1");

    // The empty file and the exact multiple both end in an empty chunk,
    // which in enhanced mode only arrives over the point-to-point path.
    for (name, size) in [
        ("empty.bin", 0),
        ("exact.bin", CHUNK_SIZE),
        ("big.bin", 2 * CHUNK_SIZE + 9),
    ]
    .iter()
    {
        let path = swarm.write_subject_file(name, *size);
        swarm.peers[0].backup(&path, 2).await?;

        let restored_path = swarm.peers[0].restore(&path).await?;
        assert_eq!(fs::read(&path)?, fs::read(&restored_path)?, "mismatch for {}", name);
    }

    Ok(())
}

#[tokio::test]
async fn lonely_backup_fails_to_reach_degree() {
    let mut swarm = Swarm::create("lonely", 1, "1.0");
    let path = swarm.write_subject_file("alone.bin", 100);

    let result = swarm.peers[0].backup(&path, 1).await;

    match result {
        Err(chunkmesh::BackupError::DegreeNotReached {
            achieved, desired, ..
        }) => {
            assert_eq!(achieved, 0);
            assert_eq!(desired, 1);
        }
        other => panic!("expected DegreeNotReached, got {:?}", other),
    }
}

#[tokio::test]
async fn restore_reports_progress_when_chunks_are_missing() {
    let mut swarm = Swarm::create("restore_timeout", 1, "1.0");
    let path = swarm.write_subject_file("missing.bin", CHUNK_SIZE + 5);

    // A lonely backup registers the file locally but no one stores it.
    assert!(swarm.peers[0].backup(&path, 1).await.is_err());

    match swarm.peers[0].restore(&path).await {
        Err(chunkmesh::RestoreError::Incomplete { received, expected }) => {
            assert_eq!(received, 0);
            assert_eq!(expected, 2);
        }
        other => panic!("expected Incomplete, got {:?}", other),
    }

    // The timeout cleared the restore bookkeeping; a retry starts from
    // scratch instead of wedging on the first attempt's leftovers.
    assert!(matches!(
        swarm.peers[0].restore(&path).await,
        Err(chunkmesh::RestoreError::Incomplete { received: 0, .. })
    ));
}

#[tokio::test]
async fn delete_purges_chunks_from_the_swarm() -> Result<(), Box<dyn Error>> {
    let mut swarm = Swarm::create("delete", 3, "1.0");
    let path = swarm.write_subject_file("doomed.bin", 2 * CHUNK_SIZE);
    let file_id = FileId::for_path(&path);

    swarm.peers[0].backup(&path, 2).await?;
    for peer in &swarm.peers[1..] {
        assert!(peer.state().await.contains(file_id.as_str()), "backup left no trace");
    }

    swarm.peers[0].delete(&path).await?;
    settle().await;

    for peer in &swarm.peers[1..] {
        let report = peer.state().await;
        assert!(!report.contains(file_id.as_str()), "chunks survived delete:\n{}", report);
    }
    // Deleting again is an error, the file is no longer registered.
    assert!(swarm.peers[0].delete(&path).await.is_err());

    Ok(())
}

#[tokio::test]
async fn reclaim_evicts_over_replicated_chunks_but_never_orphans() -> Result<(), Box<dyn Error>> {
    // Degree 1 with two storers: both store in the first round, so each
    // perceives the chunk as over-replicated by one.
    let mut swarm = Swarm::create("reclaim", 3, "1.0");
    let path = swarm.write_subject_file("squeezed.bin", 1000);
    swarm.peers[0].backup(&path, 1).await?;
    settle().await;

    let first = swarm.peers[1].reclaim(0).await;
    assert!(first.target_met, "over-replicated chunks should be evictable");
    assert_eq!(first.used_space, 0);
    settle().await;

    // The remaining copy is now exactly at its desired degree; reclaim
    // must refuse to evict it.
    let second = swarm.peers[2].reclaim(0).await;
    assert!(!second.target_met);
    assert!(second.used_space > 0);

    let restored_path = swarm.peers[0].restore(&path).await?;
    assert_eq!(fs::read(&path)?, fs::read(&restored_path)?);

    Ok(())
}

#[tokio::test]
async fn eviction_below_desired_degree_triggers_re_replication() -> Result<(), Box<dyn Error>> {
    let mut swarm = Swarm::create("self_heal", 4, "1.0");
    let path = swarm.write_subject_file("healed.bin", 500);
    let file_id = FileId::for_path(&path);

    // All three non-initiators store, putting the chunk exactly at its
    // desired degree.
    swarm.peers[0].backup(&path, 3).await?;
    settle().await;
    swarm.drain_observer();

    // Peer 3 announces it dropped chunk 0. The surviving storers now
    // perceive degree 2 of 3 and one of them must re-replicate.
    swarm
        .observer_transport
        .broadcast(
            Channel::Control,
            &Message::Removed {
                version: ProtocolVersion::base(),
                sender: PeerId::new(3),
                file_id: file_id.clone(),
                chunk_no: 0,
            },
        )
        .await;

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let datagram = tokio::time::timeout_at(deadline, swarm.observer_rx.recv())
            .await
            .expect("no re-replication PUTCHUNK observed")
            .expect("network closed");
        if let Ok(Message::PutChunk {
            file_id: advertised, chunk_no, ..
        }) = Message::parse(&datagram.data)
        {
            assert_eq!(advertised, file_id);
            assert_eq!(chunk_no, 0);
            break;
        }
    }

    Ok(())
}

#[tokio::test]
async fn unacked_delete_is_resent_when_the_peer_reappears() -> Result<(), Box<dyn Error>> {
    let mut swarm = Swarm::create("delete_resend", 3, "1.1");
    let path = swarm.write_subject_file("tracked.bin", 100);
    let file_id = FileId::for_path(&path);

    swarm.peers[0].backup(&path, 2).await?;

    // A phantom peer claims to store chunk 0, then never acknowledges the
    // delete.
    swarm
        .observer_transport
        .broadcast(
            Channel::Control,
            &Message::Stored {
                version: ProtocolVersion::new("1.1".to_string()),
                sender: PeerId::new(99),
                file_id: file_id.clone(),
                chunk_no: 0,
            },
        )
        .await;
    settle().await;

    swarm.peers[0].delete(&path).await?;
    settle().await;
    swarm.drain_observer();

    // The phantom comes back online and announces itself.
    swarm
        .observer_transport
        .broadcast(
            Channel::Control,
            &Message::Control {
                version: ProtocolVersion::new("1.1".to_string()),
                sender: PeerId::new(99),
            },
        )
        .await;

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let datagram = tokio::time::timeout_at(deadline, swarm.observer_rx.recv())
            .await
            .expect("DELETE was not re-sent")
            .expect("network closed");
        if let Ok(Message::Delete {
            sender, file_id: deleted, ..
        }) = Message::parse(&datagram.data)
        {
            assert_eq!(sender, PeerId::new(0));
            assert_eq!(deleted, file_id);
            break;
        }
    }

    Ok(())
}

struct Swarm {
    peers: Vec<PeerHandle>,
    observer_transport: Arc<dyn Transport>,
    observer_rx: mpsc::UnboundedReceiver<InboundDatagram>,
    work_dir: PathBuf,
}

impl Swarm {
    /// Brings up `num_peers` peers (IDs 0..n) on a fresh loopback network,
    /// each with its own scratch storage directory, plus a raw observer
    /// tap on the network for the tests that forge or watch traffic.
    fn create(test_name: &str, num_peers: u32, protocol_version: &str) -> Swarm {
        let work_dir = std::env::temp_dir().join(format!("chunkmesh-it-{}", test_name));
        let _ = fs::remove_dir_all(&work_dir);
        fs::create_dir_all(&work_dir).unwrap();

        let network = LoopbackNetwork::new();
        let mut peers = Vec::with_capacity(num_peers as usize);
        for i in 0..num_peers {
            let (transport, inbound) = network.join(PeerId::new(i));
            let handle = chunkmesh::try_create_peer(PeerConfig {
                peer_id: i,
                protocol_version: protocol_version.to_string(),
                storage_directory: work_dir.join(format!("peer-{}", i)),
                transport,
                inbound,
                info_logger: create_root_logger_for_stdout(i),
                options: fast_options(),
            })
            .unwrap();
            peers.push(handle);
        }

        // The observer never speaks the protocol; any unused id works.
        let (observer_transport, observer_rx) = network.join(PeerId::new(1000));

        Swarm {
            peers,
            observer_transport,
            observer_rx,
            work_dir,
        }
    }

    fn write_subject_file(&mut self, name: &str, size: usize) -> String {
        let path = self.work_dir.join(name);
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        path.to_string_lossy().into_owned()
    }

    fn drain_observer(&mut self) {
        while self.observer_rx.try_recv().is_ok() {}
    }
}

fn fast_options() -> PeerOptions {
    PeerOptions {
        stored_reply_jitter_max: Some(Duration::from_millis(5)),
        chunk_reply_jitter_max: Some(Duration::from_millis(5)),
        rebackup_jitter_max: Some(Duration::from_millis(5)),
        backup_initial_backoff: Some(Duration::from_millis(50)),
        backup_max_attempts: Some(5),
        restore_timeout: Some(Duration::from_secs(3)),
        snapshot_interval: Some(Duration::from_secs(60)),
        storage_capacity: Some(8_000_000),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[allow(dead_code)]
fn create_root_logger_for_file(directory_prefix: &str, peer_id: u32) -> slog::Logger {
    let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let log_path = format!("{}/peer_{}_{}.log", directory_prefix, peer_id, now);
    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)
        .unwrap();

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("Peer" => peer_id))
}

fn create_root_logger_for_stdout(peer_id: u32) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("Peer" => peer_id))
}
