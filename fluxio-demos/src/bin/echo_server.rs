//! Echo server demo: accepts connections, echoes back whatever it receives, and closes
//! any connection idle for more than ten seconds.
//!
//! Ported from `original_source/example/echo_server.h`/`.cc`'s `EchoServer`: `on_connect`
//! seeds a per-connection `"data_buffer"` context entry and arms a non-periodic
//! `"clear_inactive_connection"` 10 s timer that shuts the connection down when it
//! fires; `on_message` resets that timer, appends the arrived bytes to `"data_buffer"`,
//! echoes them straight back, then waits for the next message; `on_write_complete` waits
//! for the next message again; `on_close` just logs.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use fluxio_net::{Connection, ConnectionHandle, Server};
use tracing::info;

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMER_KEY: &str = "clear_inactive_connection";
const DATA_BUFFER_KEY: &str = "data_buffer";
const WORKER_COUNT: usize = 4;

fn idle_timeout_callback(conn: &ConnectionHandle) -> impl FnMut() + Send + 'static {
    let weak = Arc::downgrade(conn);
    move || {
        let Some(conn) = weak.upgrade() else { return };
        info!("closing idle connection");
        Connection::shutdown(&conn);
    }
}

fn arm_idle_timer(conn: &ConnectionHandle) {
    let callback = idle_timeout_callback(conn);
    let _ =
        conn.lock().expect("connection mutex poisoned").timers().add_timer(IDLE_TIMER_KEY.to_string(), IDLE_TIMEOUT, None, callback);
}

fn reset_idle_timer(conn: &ConnectionHandle) {
    let callback = idle_timeout_callback(conn);
    let _ = conn
        .lock()
        .expect("connection mutex poisoned")
        .timers()
        .reset_timer(IDLE_TIMER_KEY.to_string(), IDLE_TIMEOUT, None, callback);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut server = Server::new(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 12345), WORKER_COUNT)?;

    server.set_on_connect(Arc::new(|conn: &ConnectionHandle| {
        conn.lock().expect("connection mutex poisoned").context().put(DATA_BUFFER_KEY, String::new());
        arm_idle_timer(conn);
        Connection::wait_for_message(conn);
    }));

    server.set_on_message(Arc::new(|conn: &ConnectionHandle| {
        reset_idle_timer(conn);
        let bytes = {
            let mut guard = conn.lock().expect("connection mutex poisoned");
            let view = guard.inbound_mut().view().to_vec();
            guard.inbound_mut().clear();
            if let Some(buffer) = guard.context().get_mut::<String>(DATA_BUFFER_KEY) {
                buffer.push_str(&String::from_utf8_lossy(&view));
            }
            view
        };
        Connection::send(conn, &bytes);
    }));

    server.set_on_write_complete(Arc::new(|conn: &ConnectionHandle| {
        Connection::wait_for_message(conn);
    }));

    server.set_on_close(Arc::new(|_conn: &ConnectionHandle| {
        info!("connection closed");
    }));

    info!("echo server listening on 127.0.0.1:12345");
    server.start()?;
    Ok(())
}
