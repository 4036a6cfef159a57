use tracing::{error, info};

use crate::analyzer::PerfAnalyzer;
use crate::driver::SweepOptions;
use crate::errors::Result;
use crate::process::Executor;

/// Run each distinct batch size once, unmeasured, so model loading and
/// allocator growth do not land in the first measurement.
pub fn warmup<E: Executor>(analyzer: &mut PerfAnalyzer<E>, options: &SweepOptions) -> Result<()> {
    info!("====== Warmup start ======");

    let (protocol, url) = options.endpoint()?;

    let mut seen = Vec::with_capacity(options.batch_sizes.len());
    for &batch_size in &options.batch_sizes {
        if !seen.contains(&batch_size) {
            seen.push(batch_size);
        }
    }

    let streamed = analyzer.stream_output();
    analyzer.set_stream_output(false);

    let mut outcome = Ok(());
    for batch_size in seen {
        info!(batch_size, "Warming up");
        let mut params = options.parameters(batch_size, protocol, &url);
        if let Err(e) = analyzer.run(&mut params) {
            error!(batch_size, "Warmup failed, aborting");
            outcome = Err(e);
            break;
        }
    }

    analyzer.set_stream_output(streamed);
    if outcome.is_ok() {
        info!("====== Warmup done ======");
    }
    outcome
}
