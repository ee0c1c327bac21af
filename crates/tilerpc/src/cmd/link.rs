use std::time::Instant;

use tilerpc_dispatch::StreamCaller;

use crate::cmd::{connect_target, parse_duration, LinkArgs};
use crate::exit::{rpc_error, CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_link, OutputFormat};

pub fn heartbeat(args: LinkArgs, format: OutputFormat) -> CliResult<i32> {
    exchange_control(args, format, "heartbeat", |caller| caller.heartbeat())
}

pub fn reset(args: LinkArgs, format: OutputFormat) -> CliResult<i32> {
    exchange_control(args, format, "reset", |caller| caller.reset())
}

fn exchange_control<F>(
    args: LinkArgs,
    format: OutputFormat,
    operation: &str,
    op: F,
) -> CliResult<i32>
where
    F: FnOnce(&StreamCaller<Box<dyn tilerpc_transport::ByteTransport>>) -> tilerpc_dispatch::Result<bool>,
{
    let timeout = parse_duration(&args.timeout)?;
    let caller = StreamCaller::from_transport(connect_target(&args.target, timeout)?);

    let started = Instant::now();
    let ok = op(&caller).map_err(|err| rpc_error(&format!("{operation} failed"), err))?;
    print_link(&args.target, operation, ok, started.elapsed(), format);

    Ok(if ok { SUCCESS } else { HEALTH_CHECK_FAILED })
}
