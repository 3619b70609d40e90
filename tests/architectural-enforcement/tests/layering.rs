//! The relay core is headless
//!
//! Sockets, HTTP serving and the WebSocket library live in the daemon; the
//! core only sees channels and `PanelFrame`s.

use architectural_enforcement::{assert_clean, scan};

#[test]
fn test_core_has_no_transport_dependencies() {
    let violations = scan(&["relay/core/src"], |code| {
        code.contains("tokio_tungstenite")
            || code.contains("TcpListener")
            || code.contains("tracing_subscriber")
    });
    assert_clean("relay core must not depend on transport or logging setup", &violations);
}
