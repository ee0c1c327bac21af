#![cfg(unix)]

use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tilerpc_dispatch::{
    Device, EngineConfig, Reply, RpcError, RpcId, StreamCaller, Tile, TileProxy, WireServer,
    CONTROLLER_ADDRESS,
};
use tilerpc_format::Value;
use tilerpc_transport::IoTransport;

fn demo_device() -> Device {
    let controller = Tile::new(CONTROLLER_ADDRESS, "controller")
        .rpc(RpcId(0x0004), "", "6s", |_, _| Ok(Reply::values(["wirect"])))
        .unwrap();
    let adder = Tile::new(11, "adder")
        .rpc(RpcId(0x8000), "LL", "L", |_, args| {
            let a = args[0].as_int().unwrap_or(0);
            let b = args[1].as_int().unwrap_or(0);
            Ok(Reply::values([a + b]))
        })
        .unwrap()
        .rpc(RpcId(0x8002), "", "", |_, _| Ok(Reply::Pending))
        .unwrap();
    Device::start(
        [controller, adder],
        EngineConfig {
            default_timeout: Duration::from_millis(100),
            ..EngineConfig::default()
        },
    )
    .unwrap()
}

fn link(timeout: Duration) -> (IoTransport<UnixStream>, IoTransport<UnixStream>) {
    let (host, device) = UnixStream::pair().unwrap();
    host.set_read_timeout(Some(timeout)).unwrap();
    device.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
    (IoTransport::named(host, "uds"), IoTransport::named(device, "uds"))
}

#[test]
fn physical_path_reaches_emulated_tiles() {
    let device = demo_device();
    let (host, remote) = link(Duration::from_secs(2));
    let stop = Arc::new(AtomicBool::new(false));

    let server = {
        let handle = device.handle();
        let stop = Arc::clone(&stop);
        thread::spawn(move || WireServer::new(handle).serve(remote, &stop))
    };

    let caller = StreamCaller::from_transport(host);
    assert!(caller.heartbeat().unwrap());
    assert!(caller.reset().unwrap());

    let adder = TileProxy::new(&caller, 11);
    assert_eq!(
        adder
            .rpc(RpcId(0x8000), "LL", "L", &[Value::Int(2), Value::Int(3)])
            .unwrap(),
        vec![Value::Int(5)]
    );

    let controller = TileProxy::new(&caller, CONTROLLER_ADDRESS);
    assert_eq!(controller.name().unwrap(), Bytes::from_static(b"wirect"));

    match caller.call_raw(12, RpcId(0x8000), &[]) {
        Err(RpcError::Protocol(message)) => assert_eq!(message, "no module at address 12"),
        other => panic!("unexpected result {other:?}"),
    }

    // The deferred rpc is never finished; the server reports the timeout.
    match caller.call_raw(11, RpcId(0x8002), &[]) {
        Err(RpcError::Protocol(message)) => assert!(message.contains("timed out")),
        other => panic!("unexpected result {other:?}"),
    }

    stop.store(true, Ordering::Relaxed);
    server.join().unwrap().unwrap();
}

#[test]
fn server_returns_when_peer_closes() {
    let device = demo_device();
    let (host, remote) = link(Duration::from_secs(2));
    let stop = AtomicBool::new(false);

    drop(host);
    WireServer::new(device.handle())
        .serve(remote, &stop)
        .unwrap();
}
