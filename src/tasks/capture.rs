use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::camera::CameraSession;
use crate::error::HardwareError;
use crate::events::CaptureSet;
use crate::platform::indicator::{BlinkPattern, Indicator};

/// Takes `count` photos with a self-timer of `delay` before each one.
///
/// The transfer of a frame runs concurrently with the countdown of the next
/// shot, so the whole sequence waits exactly `count * delay`. The camera is
/// released and the indicator switched off on every exit path; on error no
/// capture set is returned.
///
/// The booth never cancels this future: cancellation is only observed while
/// waiting for the trigger. If it is dropped anyway, dropping the
/// [`CameraSession`] closes the camera in the background.
pub async fn capture_sequence(
    camera: &mut CameraSession,
    indicator: &mut dyn Indicator,
    count: usize,
    delay: Duration,
) -> Result<CaptureSet, HardwareError> {
    info!(count, delay = ?delay, "capturing photos");
    let result = expose_all(camera, indicator, count, delay).await;
    camera.release().await;
    indicator.off();
    if let Err(err) = &result {
        warn!("capture sequence aborted: {err}");
    }
    result
}

async fn expose_all(
    camera: &mut CameraSession,
    indicator: &mut dyn Indicator,
    count: usize,
    delay: Duration,
) -> Result<CaptureSet, HardwareError> {
    camera.acquire().await?;
    let directory = camera
        .directory()
        .ok_or(HardwareError::NotAcquired)?
        .to_path_buf();

    indicator.blink(BlinkPattern::countdown(delay));
    sleep(delay).await;

    let mut files = Vec::with_capacity(count);
    for shot in 0..count {
        indicator.solid_on();
        info!("capturing photo {}/{}", shot + 1, count);
        let frame = camera.expose().await?;
        let path = if shot + 1 < count {
            indicator.blink(BlinkPattern::countdown(delay));
            let ((), transferred) = tokio::join!(sleep(delay), camera.transfer(&frame));
            transferred?
        } else {
            camera.transfer(&frame).await?
        };
        files.push(path);
    }
    Ok(CaptureSet { directory, files })
}
