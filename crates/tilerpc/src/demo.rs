//! Built-in emulated device used by `emulate` and `serve`.
//!
//! | Address | Rpc      | Formats      | Behavior                                  |
//! |---------|----------|--------------|-------------------------------------------|
//! | 8       | `0x0004` | `""` → `6s`  | controller name `demo01`                  |
//! | 11      | `0x0004` | `""` → `6s`  | tile name `adder1`                        |
//! | 11      | `0x8000` | `LL` → `L`   | wrapping sum of two operands              |
//! | 11      | `0x8001` | `""` → `L`   | ticks counted by a 100 ms worker          |
//! | 11      | `0x8002` | `""` → `4s`  | deferred; finished with `4444` after 50 ms |

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tilerpc_dispatch::{
    Device, EngineConfig, HandlerError, Reply, Result, RpcId, Tile, Worker, CONTROLLER_ADDRESS,
    TILE_NAME_RPC,
};
use tracing::warn;

pub const ADDER_ADDRESS: u8 = 11;
pub const ADD_RPC: RpcId = RpcId(0x8000);
pub const TICKS_RPC: RpcId = RpcId(0x8001);
pub const DEFERRED_RPC: RpcId = RpcId(0x8002);

pub fn tiles() -> Result<Vec<Tile>> {
    let controller = Tile::new(CONTROLLER_ADDRESS, "controller")
        .rpc(TILE_NAME_RPC, "", "6s", |_, _| Ok(Reply::values(["demo01"])))?;

    let ticks = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&ticks);

    let adder = Tile::new(ADDER_ADDRESS, "adder")
        .rpc(TILE_NAME_RPC, "", "6s", |_, _| Ok(Reply::values(["adder1"])))?
        .rpc(ADD_RPC, "LL", "L", |_, args| {
            let operand = |i: usize| {
                args.get(i)
                    .and_then(|v| v.as_int())
                    .ok_or_else(|| HandlerError::validation(format!("operand {i} missing")))
            };
            let sum = (operand(0)? as u32).wrapping_add(operand(1)? as u32);
            Ok(Reply::values([sum]))
        })?
        .rpc(TICKS_RPC, "", "L", move |_, _| {
            Ok(Reply::values([ticks.load(Ordering::Relaxed)]))
        })?
        .rpc(DEFERRED_RPC, "", "4s", |ctx, _| {
            let ticket = ctx.ticket();
            let handle = ctx.handle().clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                if let Err(err) = handle.finish_async_call(ticket, &b"4444"[..]) {
                    warn!(error = %err, "deferred demo call not delivered");
                }
            });
            Ok(Reply::Pending)
        })?
        .worker(Worker::periodic(
            "ticker",
            Duration::from_millis(100),
            move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
        ));

    Ok(vec![controller, adder])
}

pub fn start(config: EngineConfig) -> Result<Device> {
    Device::start(tiles()?, config)
}

#[cfg(test)]
mod tests {
    use tilerpc_format::Value;

    use super::*;

    #[test]
    fn demo_device_answers() {
        let device = start(EngineConfig::default()).unwrap();
        let handle = device.handle();

        assert_eq!(
            handle.invoke(CONTROLLER_ADDRESS, TILE_NAME_RPC, &[]).unwrap(),
            vec![Value::from("demo01")]
        );
        assert_eq!(
            handle
                .invoke(ADDER_ADDRESS, ADD_RPC, &[Value::Int(2), Value::Int(3)])
                .unwrap(),
            vec![Value::Int(5)]
        );
        assert_eq!(
            handle.invoke(ADDER_ADDRESS, DEFERRED_RPC, &[]).unwrap(),
            vec![Value::from("4444")]
        );
    }
}
