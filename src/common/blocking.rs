//! Blocking entry points
//!
//! Synchronous APIs wait on the async path of the same operation instead of
//! doing their own socket I/O.

use std::future::Future;

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::error::{Error, Result};

/// Drive `fut` to completion from synchronous code.
///
/// On a tokio worker the worker is handed back to the scheduler while
/// waiting, which needs a multi-threaded runtime. Off the runtime the future
/// runs on `runtime`, the handle captured when the endpoint was created; its
/// I/O is driven by that runtime's workers, so it too should be
/// multi-threaded.
pub fn wait<F: Future>(runtime: Option<&Handle>, fut: F) -> Result<F::Output> {
    if let Ok(current) = Handle::try_current() {
        if current.runtime_flavor() != RuntimeFlavor::MultiThread {
            return Err(Error::Runtime(
                "blocking call requires a multi-threaded tokio runtime".into(),
            ));
        }
        return Ok(tokio::task::block_in_place(|| current.block_on(fut)));
    }

    match runtime {
        Some(handle) => Ok(handle.block_on(fut)),
        None => Err(Error::Runtime(
            "blocking call made outside a tokio runtime".into(),
        )),
    }
}
