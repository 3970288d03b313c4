pub mod config;
pub mod init;
pub mod pipeline;
pub mod serve;
pub mod status;

use std::future::Future;

/// Drive one async operation to completion on a fresh runtime.
pub(crate) fn block_on<F: Future>(fut: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Runtime::new()?;
    Ok(rt.block_on(fut))
}
