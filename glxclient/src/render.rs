//! Rendering into the context current on the calling thread.
//!
//! With no context current every call here does nothing.

use crate::api::indirect;
use crate::api::indirect::command_buffer;
use crate::api::indirect::protocol::{X_GLX_WAIT_GL, X_GLX_WAIT_X};
use crate::context::{Binding, ContextState, Resources};
use crate::current;
use crate::error::Result;

/// Queue the render command `opcode` with its `payload`.
///
/// Small commands are packed into the context's buffer, commands above the
/// small command limit are sent right away in as many requests as needed.
/// Direct contexts hand the command to the driver.
pub fn render(opcode: u16, payload: &[u8]) -> Result<()> {
    with_current(|binding, resources| {
        if let Some(driver) = resources.driver.as_mut() {
            driver.0.execute(opcode.into(), payload);
            return Ok(());
        }

        let transmitter = binding.display.transmitter();
        let len = command_buffer::small_command_len(payload.len());
        if len > resources.max_small_command {
            return transmitter.send_large_command(
                &mut resources.buffer,
                binding.tag,
                opcode.into(),
                payload,
            );
        }

        if !resources.buffer.fits(len) {
            transmitter.flush(&mut resources.buffer, binding.tag)?;
        }

        resources.buffer.append_command(opcode, payload)?;

        if resources.buffer.needs_flush() {
            transmitter.flush(&mut resources.buffer, binding.tag)?;
        }

        Ok(())
    })
}

/// Send the queued commands.
pub fn flush() -> Result<()> {
    with_current(|binding, resources| {
        if let Some(driver) = resources.driver.as_mut() {
            driver.0.flush();
            return Ok(());
        }

        binding.display.transmitter().flush(&mut resources.buffer, binding.tag)
    })
}

/// Make the X server wait until the GL rendering done so far completed.
pub fn wait_gl() -> Result<()> {
    with_current(|binding, resources| {
        if let Some(driver) = resources.driver.as_mut() {
            driver.0.flush();
            if let Some(handles) = binding.handles.as_ref() {
                driver.0.wait_gl(handles.draw.as_ref());
            }

            return Ok(());
        }

        let transmitter = binding.display.transmitter();
        transmitter.flush(&mut resources.buffer, binding.tag)?;
        indirect::wait(transmitter, X_GLX_WAIT_GL, binding.tag)
    })
}

/// Make GL rendering wait until the X rendering done so far completed.
pub fn wait_x() -> Result<()> {
    with_current(|binding, resources| {
        if let Some(driver) = resources.driver.as_mut() {
            if let Some(handles) = binding.handles.as_ref() {
                driver.0.wait_x(handles.draw.as_ref());
            }

            return Ok(());
        }

        let transmitter = binding.display.transmitter();
        transmitter.flush(&mut resources.buffer, binding.tag)?;
        indirect::wait(transmitter, X_GLX_WAIT_X, binding.tag)
    })
}

fn with_current<F>(f: F) -> Result<()>
where
    F: FnOnce(&Binding, &mut Resources) -> Result<()>,
{
    let current = current::current();
    let Some(context) = current.context() else {
        return Ok(());
    };

    let mut state = context.lock_state();
    match &mut *state {
        ContextState { binding: Some(binding), resources: Some(resources), .. } => {
            f(binding, resources)
        },
        _ => Ok(()),
    }
}
