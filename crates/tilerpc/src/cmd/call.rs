use std::time::Instant;

use tilerpc_dispatch::{RpcCaller, RpcId, StreamCaller};
use tilerpc_format::{FormatCode, FormatString, Value};
use tracing::debug;

use crate::cmd::{connect_target, parse_duration, parse_format, parse_values, CallArgs, RpcArgs};
use crate::exit::{rpc_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_call, CallReport, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.call.timeout)?;
    let (arg_format, result_format) = wire_formats(&args.call)?;
    let values = match &arg_format {
        Some(arg_format) => parse_values(arg_format, &args.call.args)?,
        None => Vec::new(),
    };

    let transport = connect_target(&args.target, timeout)?;
    let caller = StreamCaller::from_transport(transport);
    let rpc_id = RpcId(args.call.rpc_id);

    let started = Instant::now();
    let (result_format, result) = match result_format {
        Some(result_format) => {
            let arg_format = arg_format.unwrap_or_default();
            let result = caller
                .call(args.call.address, rpc_id, &arg_format, &result_format, &values)
                .map_err(|err| rpc_error("call failed", err))?;
            (result_format, result)
        }
        None => {
            let payload = caller
                .call_raw(args.call.address, rpc_id, &values)
                .map_err(|err| rpc_error("call failed", err))?;
            debug!(len = payload.len(), "no result format given; showing raw payload");
            raw_result(payload)?
        }
    };

    print_call(
        &CallReport {
            target: &args.target,
            address: args.call.address,
            rpc_id,
            result_format: &result_format,
            values: &result,
            elapsed: started.elapsed(),
        },
        format,
    )?;
    Ok(SUCCESS)
}

fn wire_formats(call: &RpcArgs) -> CliResult<(Option<FormatString>, Option<FormatString>)> {
    let arg_format = call
        .arg_format
        .as_deref()
        .map(|text| parse_format("arg-format", text))
        .transpose()?;
    if arg_format.is_none() && !call.args.is_empty() {
        return Err(CliError::usage("--arg needs --arg-format"));
    }
    let result_format = call
        .result_format
        .as_deref()
        .map(|text| parse_format("result-format", text))
        .transpose()?;
    Ok((arg_format, result_format))
}

fn raw_result(payload: bytes::Bytes) -> CliResult<(FormatString, Vec<Value>)> {
    if payload.is_empty() {
        return Ok((FormatString::empty(), Vec::new()));
    }
    let format = FormatString::from_codes(vec![FormatCode::Bytes(payload.len())])
        .map_err(|err| CliError::new(DATA_INVALID, format!("result payload: {err}")))?;
    Ok((format, vec![Value::Bytes(payload)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_args(arg_format: Option<&str>, args: &[&str]) -> RpcArgs {
        RpcArgs {
            address: 11,
            rpc_id: 0x8000,
            arg_format: arg_format.map(str::to_string),
            result_format: None,
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout: "1s".to_string(),
        }
    }

    #[test]
    fn args_need_a_format() {
        let err = wire_formats(&rpc_args(None, &["1"])).unwrap_err();
        assert_eq!(err.code, crate::exit::USAGE);
        assert!(wire_formats(&rpc_args(Some("L"), &["1"])).is_ok());
    }

    #[test]
    fn raw_payload_becomes_one_byte_string() {
        let (format, values) = raw_result(bytes::Bytes::from_static(b"adder1")).unwrap();
        assert_eq!(format.as_str(), "6s");
        assert_eq!(values, vec![Value::from("adder1")]);

        let (format, values) = raw_result(bytes::Bytes::new()).unwrap();
        assert!(format.is_empty());
        assert!(values.is_empty());
    }
}
