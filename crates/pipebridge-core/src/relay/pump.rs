//! One-directional copy loop.

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::types::{Direction, DirectionReport, Termination};
use crate::endpoint::{EndpointReader, EndpointWriter, IdlePolicy, ReadOutcome};

/// Copy `source` into `sink` until end-of-stream, an error, an idle timeout
/// or `stop` fires. Always cancels `stop` on the way out so the opposite
/// direction follows.
///
/// `shutdown` is the caller's token; it distinguishes external cancellation
/// from the opposite direction having stopped first.
pub(super) async fn pump(
    direction: Direction,
    source: &mut EndpointReader,
    sink: &mut EndpointWriter,
    buffer_size: usize,
    stop: &CancellationToken,
    shutdown: &CancellationToken,
) -> DirectionReport {
    let mut buf = vec![0u8; buffer_size];
    let mut bytes: u64 = 0;

    let termination = loop {
        let outcome = tokio::select! {
            biased;
            () = stop.cancelled() => break stopped_by(shutdown),
            outcome = source.read(&mut buf) => outcome,
        };

        match outcome {
            Ok(ReadOutcome::Data(n)) => {
                let written = tokio::select! {
                    biased;
                    () = stop.cancelled() => break stopped_by(shutdown),
                    written = sink.write_all(&buf[..n]) => written,
                };
                if let Err(e) = written {
                    break Termination::WriteFailed(e);
                }
                bytes += n as u64;
                trace!(%direction, n, total = bytes, "Forwarded chunk");
            }
            Ok(ReadOutcome::EndOfStream) => break Termination::EndOfStream,
            Ok(ReadOutcome::TimedOut) => {
                let policy = source
                    .read_deadline()
                    .map_or(IdlePolicy::EndSession, |deadline| deadline.on_expiry);
                if policy == IdlePolicy::KeepWaiting {
                    continue;
                }
                break Termination::IdleTimeout;
            }
            Err(e) => break Termination::ReadFailed(e),
        }
    };

    stop.cancel();
    debug!(
        %direction,
        source = %source.kind(),
        sink = %sink.kind(),
        bytes,
        termination = %termination,
        "Relay direction finished"
    );

    DirectionReport {
        direction,
        source: source.kind(),
        sink: sink.kind(),
        bytes,
        termination,
    }
}

fn stopped_by(shutdown: &CancellationToken) -> Termination {
    if shutdown.is_cancelled() {
        Termination::Cancelled
    } else {
        Termination::PeerTerminated
    }
}
