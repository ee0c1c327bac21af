use std::time::Instant;

use tilerpc_dispatch::{EngineConfig, RpcId};

use crate::cmd::{parse_duration, parse_format, parse_values, EmulateArgs};
use crate::demo;
use crate::exit::{rpc_error, CliResult, SUCCESS};
use crate::output::{print_call, CallReport, OutputFormat};

/// Run one call against the built-in device. Formats default to the ones
/// the tile declares; `--arg-format`/`--result-format` override them.
pub fn run(args: EmulateArgs, format: OutputFormat) -> CliResult<i32> {
    let call = args.call;
    let timeout = parse_duration(&call.timeout)?;
    let rpc_id = RpcId(call.rpc_id);

    let device = demo::start(EngineConfig {
        default_timeout: timeout,
        ..EngineConfig::default()
    })
    .map_err(|err| rpc_error("device start failed", err))?;
    let handle = device.handle();

    let (declared_args, declared_result) = handle
        .declared_formats(call.address, rpc_id)
        .map_err(|err| rpc_error("call failed", err))?;
    let arg_format = match call.arg_format.as_deref() {
        Some(text) => parse_format("arg-format", text)?,
        None => declared_args,
    };
    let result_format = match call.result_format.as_deref() {
        Some(text) => parse_format("result-format", text)?,
        None => declared_result,
    };
    let values = parse_values(&arg_format, &call.args)?;

    let started = Instant::now();
    let result = handle
        .call_with_timeout(
            call.address,
            rpc_id,
            &arg_format,
            &result_format,
            &values,
            timeout,
        )
        .map_err(|err| rpc_error("call failed", err))?;

    print_call(
        &CallReport {
            target: "emulated",
            address: call.address,
            rpc_id,
            result_format: &result_format,
            values: &result,
            elapsed: started.elapsed(),
        },
        format,
    )?;
    Ok(SUCCESS)
}
