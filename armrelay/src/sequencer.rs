/*!
Macro sequencer.

Replays a macro's step table onto the controller link, strictly in order,
pausing `delay_after` behind every frame. The pause is mechanical settle time
for the arm; the connection is not read again until the sequence finishes.
*/

use shared::macros::MacroSelector;
use tracing::{info, warn};

use crate::serial::{self, ControllerLink};

/// Outcome of one macro run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroReport {
    pub selector: MacroSelector,
    pub frames_sent: usize,
    pub frames_dropped: usize,
}

/// Run `selector` against the link
///
/// A dropped frame does not abort the sequence; the remaining steps still go
/// out on schedule.
pub async fn run_macro<L: ControllerLink + ?Sized>(
    link: &mut L,
    selector: MacroSelector,
) -> MacroReport {
    let steps = selector.steps();
    info!("🤖 Running macro {} ({} steps)", selector, steps.len());

    let mut report = MacroReport {
        selector,
        frames_sent: 0,
        frames_dropped: 0,
    };

    for step in steps {
        if serial::forward(link, step.frame) {
            report.frames_sent += 1;
        } else {
            report.frames_dropped += 1;
        }
        tokio::time::sleep(step.delay_after).await;
    }

    if report.frames_dropped > 0 {
        warn!(
            "⚠️ Macro {} finished with {} of {} frames dropped",
            selector,
            report.frames_dropped,
            steps.len()
        );
    } else {
        info!("✅ Macro {} finished", selector);
    }

    report
}
