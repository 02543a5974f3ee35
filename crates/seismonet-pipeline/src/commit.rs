//! Sequence-ordered commit: classified events enter the store in
//! trigger-instant order, enforced by the detector-emit sequence number and
//! a bounded reorder buffer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use seismonet_models::{CandidateEvent, ClassifiedEvent};
use seismonet_store::EventStore;

use crate::dead_letter::DeadLetter;

/// Result of analyzing one sequenced candidate.
#[derive(Debug)]
pub enum WorkOutcome {
    Classified(Box<ClassifiedEvent>),
    /// Per-event failure routed to the dead-letter stream; the sequence
    /// number still resolves so successors are not blocked.
    Rejected {
        candidate: CandidateEvent,
        reason: &'static str,
        detail: String,
    },
}

/// Run the committer until the result channel closes, then drain.
///
/// Out-of-order completions buffer until their predecessors commit. A head
/// seq missing for longer than `reorder_window` stops blocking the line:
/// the oldest buffered outcome commits anyway and the
/// `pipeline_reorder_violations_total` counter records it; so does a
/// straggler arriving after its slot was given up.
pub async fn run_committer(
    mut rx: mpsc::Receiver<(u64, WorkOutcome)>,
    store: Arc<EventStore>,
    dead_letter: Arc<DeadLetter>,
    reorder_window: Duration,
) {
    let mut next_seq: u64 = 0;
    let mut buffer: BTreeMap<u64, (Instant, WorkOutcome)> = BTreeMap::new();

    loop {
        let received = if let Some((_, (arrived, _))) = buffer.iter().next() {
            let head_deadline = *arrived + reorder_window;
            match tokio::time::timeout_at(head_deadline, rx.recv()).await {
                Ok(item) => item,
                Err(_) => {
                    // Head-of-line has waited the whole window; give up on
                    // the missing predecessors.
                    let (&seq, _) = buffer.iter().next().expect("non-empty buffer");
                    let (_, outcome) = buffer.remove(&seq).expect("buffered seq");
                    warn!(seq, waiting_for = next_seq, "reorder window exceeded");
                    metrics::counter!("pipeline_reorder_violations_total").increment(1);
                    commit_one(&store, &dead_letter, outcome).await;
                    next_seq = seq + 1;
                    drain_ready(&mut buffer, &mut next_seq, &store, &dead_letter).await;
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match received {
            Some((seq, outcome)) => {
                if seq < next_seq {
                    // Straggler whose slot was already surrendered.
                    metrics::counter!("pipeline_reorder_violations_total").increment(1);
                    warn!(seq, next_seq, "late completion committed out of order");
                    commit_one(&store, &dead_letter, outcome).await;
                    continue;
                }
                buffer.insert(seq, (Instant::now(), outcome));
                metrics::gauge!("pipeline_reorder_buffer_depth").set(buffer.len() as f64);
                drain_ready(&mut buffer, &mut next_seq, &store, &dead_letter).await;
            }
            None => break,
        }
    }

    // Channel closed: drain whatever completed, in sequence order. Nothing
    // is lost silently; missing sequence numbers were dead-lettered by
    // their workers or never confirmed.
    for (seq, (_, outcome)) in std::mem::take(&mut buffer) {
        debug!(seq, "draining at shutdown");
        commit_one(&store, &dead_letter, outcome).await;
    }
}

async fn drain_ready(
    buffer: &mut BTreeMap<u64, (Instant, WorkOutcome)>,
    next_seq: &mut u64,
    store: &Arc<EventStore>,
    dead_letter: &Arc<DeadLetter>,
) {
    while let Some((_, outcome)) = buffer.remove(next_seq) {
        commit_one(store, dead_letter, outcome).await;
        *next_seq += 1;
    }
    metrics::gauge!("pipeline_reorder_buffer_depth").set(buffer.len() as f64);
}

async fn commit_one(store: &Arc<EventStore>, dead_letter: &Arc<DeadLetter>, outcome: WorkOutcome) {
    match outcome {
        WorkOutcome::Classified(event) => {
            let seq = event.seq;
            if let Err(e) = store.append(*event).await {
                // Store failure is fatal to the component contract; the
                // supervisor restarts the process and recovery replays.
                error!(seq, "store append failed: {}", e);
            }
        }
        WorkOutcome::Rejected {
            candidate,
            reason,
            detail,
        } => {
            dead_letter
                .record("analyze", reason, detail, Some(candidate))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use seismonet_models::{
        CandidateState, ChannelId, EventLabel, FeatureSchema, FeatureVector, MagnitudeEstimate,
        MagnitudeScale, PipelineTiming, TimeWindow,
    };
    use seismonet_store::{EventFilter, FsyncPolicy, StoreConfig};
    use uuid::Uuid;

    fn classified(seq: u64) -> WorkOutcome {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
            + chrono::Duration::seconds(seq as i64 * 10);
        let schema = FeatureSchema::v1();
        WorkOutcome::Classified(Box::new(ClassifiedEvent {
            event_id: Uuid::new_v4(),
            seq,
            candidate: CandidateEvent {
                detector_id: "stalta:SN.A..HHZ".to_string(),
                channel: ChannelId::new("SN", "A", "", "HHZ"),
                trigger_instant: t,
                trigger_ratio: 5.0,
                detrigger_instant: t + chrono::Duration::seconds(5),
                pre_roll: TimeWindow::new(t - chrono::Duration::seconds(5), t),
                post_roll: TimeWindow::new(
                    t + chrono::Duration::seconds(5),
                    t + chrono::Duration::seconds(15),
                ),
                state: CandidateState::Confirmed,
            },
            features: FeatureVector::new(&schema, vec![0.1; 24]).unwrap(),
            label: EventLabel::Earthquake,
            confidence: 0.9,
            magnitude: MagnitudeEstimate {
                value: 3.0,
                low: 2.5,
                high: 3.5,
                scale: MagnitudeScale::Ml,
            },
            location: None,
            stations: vec![],
            timing: PipelineTiming {
                detected_at: t,
                analyzed_at: t,
            },
        }))
    }

    async fn test_store(dir: &std::path::Path) -> Arc<EventStore> {
        Arc::new(
            EventStore::open(
                StoreConfig {
                    dir: dir.to_path_buf(),
                    fsync: FsyncPolicy::PerWrite,
                    periodic_sync_ms: 500,
                },
                "seismonet.fv.v1",
            )
            .await
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn out_of_order_completions_commit_in_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path()).await;
        let dl = Arc::new(DeadLetter::open(dir.path()).await.unwrap());
        let (tx, rx) = mpsc::channel(16);

        let committer = tokio::spawn(run_committer(
            rx,
            store.clone(),
            dl,
            Duration::from_secs(5),
        ));

        // Completions arrive 2, 0, 1.
        tx.send((2, classified(2))).await.unwrap();
        tx.send((0, classified(0))).await.unwrap();
        tx.send((1, classified(1))).await.unwrap();
        drop(tx);
        committer.await.unwrap();

        let events = store.query(&EventFilter::default()).unwrap();
        assert_eq!(events.len(), 3);
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn reorder_window_expiry_commits_anyway() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path()).await;
        let dl = Arc::new(DeadLetter::open(dir.path()).await.unwrap());
        let (tx, rx) = mpsc::channel(16);

        let committer = tokio::spawn(run_committer(
            rx,
            store.clone(),
            dl,
            Duration::from_millis(50),
        ));

        // Seq 0 never arrives; 1 must commit after the window.
        tx.send((1, classified(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.stats().events, 1);

        // The straggler commits immediately (out of order) when it shows up.
        tx.send((0, classified(0))).await.unwrap();
        drop(tx);
        committer.await.unwrap();
        assert_eq!(store.stats().events, 2);
    }

    #[tokio::test]
    async fn rejected_outcomes_unblock_their_successors() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path()).await;
        let dl = Arc::new(DeadLetter::open(dir.path()).await.unwrap());
        let (tx, rx) = mpsc::channel(16);

        let committer = tokio::spawn(run_committer(
            rx,
            store.clone(),
            dl,
            Duration::from_secs(5),
        ));

        tx.send((1, classified(1))).await.unwrap();
        let rejected = match classified(0) {
            WorkOutcome::Classified(ev) => WorkOutcome::Rejected {
                candidate: ev.candidate,
                reason: "schema_mismatch",
                detail: "test".to_string(),
            },
            _ => unreachable!(),
        };
        tx.send((0, rejected)).await.unwrap();
        drop(tx);
        committer.await.unwrap();

        // Seq 0 went to dead letter, seq 1 committed.
        let events = store.query(&EventFilter::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 1);
        let dl_content =
            std::fs::read_to_string(dir.path().join("dead_letter.jsonl")).unwrap();
        assert!(dl_content.contains("schema_mismatch"));
    }
}
