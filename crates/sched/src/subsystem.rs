use crate::context::TaskContext;

/// Engine-wide work the primary TaskMaster runs once per frame, after task
/// updates (rendering, input polling, an editor overlay and the like).
///
/// Subsystems talk to tasks through the context they are given; messages
/// they send carry the primary thread's id as their source.
pub trait FrameSubsystem: Send {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Disabled subsystems are skipped without being removed.
    fn enabled(&self) -> bool {
        true
    }

    fn update(&mut self, delta: f32, ctx: &mut TaskContext<'_>);

    /// Called after every auxiliary finished the frame and before pacing.
    fn end_frame(&mut self) {}
}
