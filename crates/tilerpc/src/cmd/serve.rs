use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tilerpc_dispatch::{EngineConfig, WireServer};
use tracing::{info, warn};

use crate::cmd::{parse_duration, ServeArgs};
use crate::demo;
use crate::exit::{rpc_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_stats, OutputFormat};

/// Poll interval at which idle sessions notice a stop request.
const SESSION_POLL: Duration = Duration::from_millis(200);

#[cfg(unix)]
pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    use tilerpc_transport::UnixDomainSocket;

    use crate::exit::transport_error;

    let call_timeout = parse_duration(&args.call_timeout)?;
    let device = demo::start(EngineConfig {
        default_timeout: call_timeout,
        ..EngineConfig::default()
    })
    .map_err(|err| rpc_error("device start failed", err))?;
    let server = WireServer::new(device.handle()).with_call_timeout(call_timeout);

    let socket = UnixDomainSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    let stop = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(Arc::clone(&stop), args.path.clone())?;
    info!(path = %args.path.display(), "serving emulated device");

    thread::scope(|scope| -> CliResult<()> {
        while !stop.load(Ordering::SeqCst) {
            let link = match socket.accept(Some(SESSION_POLL)) {
                Ok(link) => link,
                Err(err) if stop.load(Ordering::SeqCst) => {
                    info!(error = %err, "accept interrupted by shutdown");
                    break;
                }
                Err(err) => return Err(transport_error("accept failed", err)),
            };
            if stop.load(Ordering::SeqCst) {
                break;
            }
            let server = &server;
            let stop = &*stop;
            scope.spawn(move || {
                if let Err(err) = server.serve(link, stop) {
                    warn!(error = %err, "session ended with error");
                }
            });
        }
        Ok(())
    })?;

    print_stats(&device.handle().stats(), format);
    Ok(SUCCESS)
}

#[cfg(not(unix))]
pub fn run(_args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(CliError::usage("serve needs Unix domain sockets"))
}

/// Stop flag plus a throwaway connection so the blocking accept returns.
#[cfg(unix)]
fn install_ctrlc_handler(stop: Arc<AtomicBool>, path: std::path::PathBuf) -> CliResult<()> {
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
        let _ = std::os::unix::net::UnixStream::connect(&path);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
