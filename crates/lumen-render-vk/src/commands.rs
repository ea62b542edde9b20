// SPDX-License-Identifier: CEPL-1.0
//! One-shot command submission for uploads and layout transitions.
//!
//! Blocks on queue idle. Not for per-frame work.
use anyhow::{Context, Result};
use ash::vk;

use crate::device::{Device, SubmitDesc};
use crate::error::VkResultExt;

pub fn begin_single_time_commands<D: Device>(device: &D) -> Result<vk::CommandBuffer> {
    let cmd = device
        .allocate_command_buffers(1)
        .call("vkAllocateCommandBuffers")?
        .into_iter()
        .next()
        .context("driver returned no command buffer")?;
    let begun = device
        .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
        .call("vkBeginCommandBuffer");
    if let Err(e) = begun {
        device.free_command_buffers(&[cmd]);
        return Err(e.into());
    }
    Ok(cmd)
}

/// End, submit, wait for the queue to drain, free. The buffer is freed even
/// when a step fails.
pub fn end_single_time_commands<D: Device>(device: &D, cmd: vk::CommandBuffer) -> Result<()> {
    let result = (|| -> Result<()> {
        device.end_command_buffer(cmd).call("vkEndCommandBuffer")?;
        let command_buffers = [cmd];
        device
            .queue_submit(&SubmitDesc {
                command_buffers: &command_buffers,
                ..Default::default()
            })
            .call("vkQueueSubmit")?;
        device.queue_wait_idle().call("vkQueueWaitIdle")?;
        Ok(())
    })();
    device.free_command_buffers(&[cmd]);
    result
}

/// Record with `record`, then submit and wait.
pub fn immediate_submit<D, F>(device: &D, record: F) -> Result<()>
where
    D: Device,
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    let cmd = begin_single_time_commands(device)?;
    if let Err(e) = record(cmd) {
        let _ = device.end_command_buffer(cmd);
        device.free_command_buffers(&[cmd]);
        return Err(e);
    }
    end_single_time_commands(device, cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;
    use anyhow::anyhow;

    #[test]
    fn immediate_submit_waits_and_frees() {
        let device = MockDevice::new();
        let mut recorded = None;
        immediate_submit(&device, |cmd| {
            recorded = Some(cmd);
            Ok(())
        })
        .unwrap();
        assert!(recorded.is_some());
        assert_eq!(device.submits(), 1);
        assert_eq!(device.queue_idles(), 1);
        assert_eq!(device.live("command_buffer"), 0);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn failed_recording_is_not_submitted() {
        let device = MockDevice::new();
        let err = immediate_submit(&device, |_| Err(anyhow!("copy failed"))).unwrap_err();
        assert_eq!(err.to_string(), "copy failed");
        assert_eq!(device.submits(), 0);
        assert_eq!(device.live("command_buffer"), 0);
    }
}
