//! StreamingReconstructor - threaded front-end over the processing context.
//!
//! Frames are submitted from any thread and queued on an unbounded channel.
//! A single worker thread owns the [`ReconstructionContext`], so at most one
//! chunk is in inference at any time and chunks are integrated in order.
//! Consumers receive `ChunkReady` events on a channel and can poll the latest
//! cloud snapshot.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::ReconstructionConfig;
use crate::frames::Frame;
use crate::inference::{EmbeddingOracle, InferenceOracle};

use super::context::{
    FinalReconstruction, Phase, ReconstructionContext, ReconstructionError, SessionStatus,
};
use super::messages::{ChunkReady, CloudSnapshot};
use super::shared_state::SharedState;

/// Commands sent to the processing worker.
enum Command {
    Frame(Frame),
    Finalize(Sender<FinalReconstruction>),
}

pub struct StreamingReconstructor {
    /// Shared snapshot and status, written by the worker.
    shared: Arc<SharedState>,

    /// `None` once finalize has been requested.
    commands: Option<Sender<Command>>,

    worker: Option<JoinHandle<()>>,
}

impl StreamingReconstructor {
    /// Validate the configuration and start the processing worker.
    ///
    /// Returns the reconstructor and the receiver of `ChunkReady` events.
    pub fn spawn(
        config: ReconstructionConfig,
        oracle: Box<dyn InferenceOracle>,
        embedder: Option<Box<dyn EmbeddingOracle>>,
    ) -> Result<(Self, Receiver<ChunkReady>), ReconstructionError> {
        let context = ReconstructionContext::new(config, oracle, embedder)?;
        let shared = SharedState::new(context.snapshot());

        let (command_sender, command_receiver) = unbounded::<Command>();
        let (event_sender, event_receiver) = unbounded::<ChunkReady>();

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("recon-worker".into())
            .spawn(move || run_worker(context, command_receiver, event_sender, worker_shared))?;

        Ok((
            Self {
                shared,
                commands: Some(command_sender),
                worker: Some(worker),
            },
            event_receiver,
        ))
    }

    /// Queue a frame for processing. Never blocks and never drops frames.
    pub fn submit_frame(&self, frame: Frame) -> Result<(), ReconstructionError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or(ReconstructionError::NotStreaming(Phase::Finalizing))?;
        self.shared.record_submitted();
        commands
            .send(Command::Frame(frame))
            .map_err(|_| ReconstructionError::WorkerDisconnected)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<CloudSnapshot> {
        self.shared.snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    /// Frames submitted so far.
    pub fn frames_submitted(&self) -> u64 {
        self.shared.frames_submitted()
    }

    /// Flush the stream, run finalize on the worker and wait for the result.
    pub fn finalize(mut self) -> Result<FinalReconstruction, ReconstructionError> {
        let commands = self
            .commands
            .take()
            .ok_or(ReconstructionError::NotStreaming(Phase::Finalizing))?;
        let (reply_sender, reply_receiver) = crossbeam_channel::bounded(1);
        commands
            .send(Command::Finalize(reply_sender))
            .map_err(|_| ReconstructionError::WorkerDisconnected)?;
        drop(commands);

        let result = reply_receiver
            .recv()
            .map_err(|_| ReconstructionError::WorkerDisconnected)?;
        self.join_worker();
        Ok(result)
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Processing worker panicked");
            }
        }
    }

    /// Stop the worker without finalizing. Queued frames are discarded.
    pub fn shutdown(&mut self) {
        self.shared.request_shutdown();
        // Dropping the sender ends the worker's receive loop.
        self.commands = None;
        self.join_worker();
    }
}

impl Drop for StreamingReconstructor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    mut context: ReconstructionContext,
    commands: Receiver<Command>,
    events: Sender<ChunkReady>,
    shared: Arc<SharedState>,
) {
    info!("Processing worker started");

    for command in commands.iter() {
        if shared.is_shutdown_requested() {
            break;
        }
        match command {
            Command::Frame(frame) => {
                if context.next_frame_cuts_chunk() {
                    shared.set_status(SessionStatus::Processing);
                }
                match context.push_frame(frame) {
                    Ok(Some(event)) => {
                        shared.publish(context.snapshot());
                        send_event(&events, event);
                    }
                    Ok(None) => shared.set_status(context.status()),
                    Err(err) => warn!("Dropping frame: {}", err),
                }
            }
            Command::Finalize(reply) => {
                shared.set_status(SessionStatus::Finalizing);
                if let Some(event) = context.finish_stream() {
                    shared.publish(context.snapshot());
                    send_event(&events, event);
                }
                shared.set_status(SessionStatus::LoopClosure);
                let result = context.finalize();
                shared.publish(context.snapshot());
                if reply.send(result).is_err() {
                    debug!("Finalize caller went away before the result was ready");
                }
                break;
            }
        }
    }

    info!(
        "Processing worker exiting. Stats: frames={}, chunks={}, failed={}, unaligned={}",
        context.stats().frames_received,
        context.stats().chunks_processed,
        context.stats().chunks_failed,
        context.stats().chunks_unaligned
    );
}

fn send_event(events: &Sender<ChunkReady>, event: ChunkReady) {
    if events.send(event).is_err() {
        debug!("No event consumer; chunk event dropped");
    }
}
