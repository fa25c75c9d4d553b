use tokio::time::sleep;
use uuid::Uuid;

use crate::error::DeskError;

use super::protocol::{self, Command, COMMAND_UUID, HEIGHT_UUID, REFERENCE_INPUT_UUID};
use super::session::{MotionProfile, MoveSession, StepOutcome};

/// Byte-level access to the desk's GATT characteristics.
///
/// Implemented over btleplug for real hardware; tests drive the controller
/// with scripted implementations instead.
#[allow(async_fn_in_trait)]
pub trait DeskTransport {
    /// Read the current value of a characteristic.
    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, DeskError>;

    /// Write a payload to a characteristic.
    async fn write_characteristic(&self, uuid: Uuid, payload: &[u8]) -> Result<(), DeskError>;
}

/// How a move session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Already within tolerance of the target; nothing was sent.
    AlreadyAtTarget,
    /// The desk converged onto the target.
    Arrived,
    /// The desk stopped short of the target (end stop or obstruction).
    Stalled,
    /// The iteration ceiling expired before arrival or stall.
    TimedOut,
}

/// Result of a move session that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveReport {
    pub outcome: MoveOutcome,
    /// Resting height read back after the final stop.
    pub final_height_mm: f64,
}

/// Drives one desk over a characteristic transport.
///
/// A controller issues strictly sequential reads and writes; the stability
/// heuristic depends on each height reading landing after the preceding
/// reference write and its settle delay.
pub struct DeskController<T> {
    transport: T,
    profile: MotionProfile,
}

impl<T: DeskTransport> DeskController<T> {
    pub fn new(transport: T) -> Self {
        Self::with_profile(transport, MotionProfile::default())
    }

    pub fn with_profile(transport: T, profile: MotionProfile) -> Self {
        Self { transport, profile }
    }

    /// The underlying transport, e.g. for disconnecting after a session.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Read the current desk height in millimeters. Always a fresh read.
    pub async fn get_height(&self) -> Result<f64, DeskError> {
        let data = self.transport.read_characteristic(HEIGHT_UUID).await?;
        protocol::decode_height(&data)
    }

    /// Stop any ongoing movement.
    pub async fn stop(&self) -> Result<(), DeskError> {
        self.write_command(Command::Stop).await
    }

    async fn write_command(&self, command: Command) -> Result<(), DeskError> {
        log::debug!("sending command {:?} -> {:02X?}", command, command.encode());
        self.transport
            .write_characteristic(COMMAND_UUID, &command.encode())
            .await
    }

    /// Drive the desk to `target_mm` and report where it came to rest.
    ///
    /// The desk treats the reference position as a setpoint that decays
    /// unless refreshed, so the loop re-asserts it every iteration until
    /// the session state machine calls arrival, stall or timeout. A STOP
    /// always follows loop exit so the desk never keeps drifting under a
    /// stale reference. A transport error instead aborts the session
    /// immediately, leaving the desk in an unknown motion state; callers
    /// should issue an explicit stop as recovery.
    pub async fn move_to(&self, target_mm: f64) -> Result<MoveReport, DeskError> {
        let current = self.get_height().await?;
        if (target_mm - current).abs() < self.profile.arrival_threshold_mm {
            log::info!("already at target ({current:.0}mm), nothing to do");
            return Ok(MoveReport {
                outcome: MoveOutcome::AlreadyAtTarget,
                final_height_mm: current,
            });
        }

        log::info!("moving from {current:.0}mm to {target_mm:.0}mm");

        // Some firmware revisions ignore reference writes until woken, and
        // the stop cancels residual motion from a previous session.
        self.write_command(Command::Wakeup).await?;
        self.write_command(Command::Stop).await?;
        sleep(self.profile.wake_settle).await;

        let reference = protocol::encode_height(target_mm);
        let mut session = MoveSession::new(self.profile, target_mm, current);

        let outcome = loop {
            self.transport
                .write_characteristic(REFERENCE_INPUT_UUID, &reference)
                .await?;
            sleep(self.profile.poll_interval).await;

            let height = self.get_height().await?;
            let step = session.observe(height);
            log::debug!(
                "iteration {}: height {height:.1}mm (target {target_mm:.1}mm)",
                session.elapsed_iterations()
            );

            match step {
                StepOutcome::Moving => continue,
                StepOutcome::Arrived => break MoveOutcome::Arrived,
                StepOutcome::Stalled => break MoveOutcome::Stalled,
                StepOutcome::TimedOut => break MoveOutcome::TimedOut,
            }
        };

        log::info!(
            "session ended ({outcome:?}) after {} iterations",
            session.elapsed_iterations()
        );

        self.stop().await?;
        sleep(self.profile.stop_settle).await;
        let final_height_mm = self.get_height().await?;

        Ok(MoveReport {
            outcome,
            final_height_mm,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Transport fake that replays a height script and records every write.
    /// The last scripted height repeats once the script is exhausted.
    struct ScriptedDesk {
        heights: Mutex<Vec<f64>>,
        writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
        reads: Mutex<usize>,
        fail_read_at: Option<usize>,
    }

    impl ScriptedDesk {
        fn new(heights: &[f64]) -> Self {
            Self {
                heights: Mutex::new(heights.to_vec()),
                writes: Mutex::new(Vec::new()),
                reads: Mutex::new(0),
                fail_read_at: None,
            }
        }

        fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
            self.writes.lock().unwrap().clone()
        }

        fn reference_writes(&self) -> usize {
            self.writes()
                .iter()
                .filter(|(uuid, _)| *uuid == REFERENCE_INPUT_UUID)
                .count()
        }
    }

    impl DeskTransport for ScriptedDesk {
        async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, DeskError> {
            assert_eq!(uuid, HEIGHT_UUID, "only the height characteristic is readable");
            let mut reads = self.reads.lock().unwrap();
            *reads += 1;
            if self.fail_read_at == Some(*reads) {
                return Err(DeskError::Transport(btleplug::Error::NotConnected));
            }
            let mut heights = self.heights.lock().unwrap();
            let height = if heights.len() > 1 {
                heights.remove(0)
            } else {
                heights[0]
            };
            Ok(protocol::encode_height(height).to_vec())
        }

        async fn write_characteristic(&self, uuid: Uuid, payload: &[u8]) -> Result<(), DeskError> {
            self.writes.lock().unwrap().push((uuid, payload.to_vec()));
            Ok(())
        }
    }

    const STOP_BYTES: [u8; 2] = [0xFF, 0x00];

    /// The write issued right after the control loop exits must be a STOP.
    fn assert_stop_follows_loop(writes: &[(Uuid, Vec<u8>)]) {
        let (last_uuid, last_payload) = writes.last().expect("no writes recorded");
        assert_eq!(*last_uuid, COMMAND_UUID);
        assert_eq!(last_payload.as_slice(), STOP_BYTES);
        let (prev_uuid, _) = &writes[writes.len() - 2];
        assert_eq!(*prev_uuid, REFERENCE_INPUT_UUID);
    }

    #[tokio::test]
    async fn test_get_height_decodes_fresh_reading() {
        let controller = DeskController::new(ScriptedDesk::new(&[731.0]));
        assert_eq!(controller.get_height().await.unwrap(), 731.0);
    }

    #[tokio::test]
    async fn test_stop_writes_stop_opcode() {
        let controller = DeskController::new(ScriptedDesk::new(&[700.0]));
        controller.stop().await.unwrap();
        assert_eq!(
            controller.transport().writes(),
            vec![(COMMAND_UUID, STOP_BYTES.to_vec())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_band_issues_no_writes() {
        let controller = DeskController::new(ScriptedDesk::new(&[1002.0]));
        let report = controller.move_to(1000.0).await.unwrap();
        assert_eq!(report.outcome, MoveOutcome::AlreadyAtTarget);
        assert_eq!(report.final_height_mm, 1002.0);
        assert!(controller.transport().writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_converging_move_arrives() {
        // Initial read at 700mm, then the desk climbs 40mm per poll.
        let mut script = vec![700.0];
        let mut height: f64 = 700.0;
        while height < 1000.0 {
            height += 40.0;
            script.push(height.min(1000.0));
        }
        let controller = DeskController::new(ScriptedDesk::new(&script));

        let report = controller.move_to(1000.0).await.unwrap();

        assert_eq!(report.outcome, MoveOutcome::Arrived);
        assert!((report.final_height_mm - 1000.0).abs() < 5.0);
        let writes = controller.transport().writes();
        // Wake pulse then stop, before any reference write.
        assert_eq!(writes[0], (COMMAND_UUID, vec![0xFE, 0x00]));
        assert_eq!(writes[1], (COMMAND_UUID, STOP_BYTES.to_vec()));
        assert_eq!(writes[2].0, REFERENCE_INPUT_UUID);
        assert_eq!(writes[2].1, protocol::encode_height(1000.0).to_vec());
        assert_stop_follows_loop(&writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_obstructed_move_stalls() {
        // The desk rises, then jams just above 800mm.
        let desk = ScriptedDesk::new(&[700.0, 760.0, 800.0, 800.2, 800.4, 800.1]);
        let controller = DeskController::new(desk);

        let report = controller.move_to(1000.0).await.unwrap();

        assert_eq!(report.outcome, MoveOutcome::Stalled);
        assert!((report.final_height_mm - 800.1).abs() < 0.1);
        // Stall detection fires well before the iteration ceiling.
        assert_eq!(controller.transport().reference_writes(), 5);
        assert_stop_follows_loop(&controller.transport().writes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_desk_times_out() {
        // Alternating +-2mm readings defeat both arrival and stall checks.
        let mut script = vec![700.0];
        for i in 0..155 {
            script.push(if i % 2 == 0 { 702.0 } else { 700.0 });
        }
        let controller = DeskController::new(ScriptedDesk::new(&script));

        let report = controller.move_to(1000.0).await.unwrap();

        assert_eq!(report.outcome, MoveOutcome::TimedOut);
        assert_eq!(controller.transport().reference_writes(), 150);
        assert_stop_follows_loop(&controller.transport().writes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_aborts_session() {
        let mut desk = ScriptedDesk::new(&[700.0, 750.0, 790.0]);
        desk.fail_read_at = Some(3); // second in-loop height read
        let controller = DeskController::new(desk);

        let err = controller.move_to(1000.0).await.unwrap_err();

        assert!(matches!(err, DeskError::Transport(_)));
        // The abort path sends no trailing STOP; recovery is the caller's job.
        let writes = controller.transport().writes();
        assert_eq!(writes.last().unwrap().0, REFERENCE_INPUT_UUID);
    }
}
