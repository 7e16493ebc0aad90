//! Streaming Example - Backpressure-aware response piping
//!
//! This example streams a payload through the response with a small
//! simulated socket buffer, showing the pause/resume cycle the writable
//! callback drives.
//!
//! # Running This Example
//!
//! ```bash
//! cargo run --example streaming
//! ```

use std::rc::Rc;

use gale::http::testing::{MockApp, MockRequest, MockResponse, MockTransport};
use gale::{
    ChunkedProducer, HandlerOutcome, HeaderPreset, Payload, ReplyHeaders, Route, RouteMethod,
    Server, ServerOptions,
};

fn main() {
    println!("gale Streaming Example");
    println!("======================\n");

    // 64 KiB of data, piped in 4 KiB chunks.
    let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 251) as u8).collect();
    let source = payload.clone();

    let server = Server::new(ServerOptions::<MockTransport> {
        routes: vec![Route::new(RouteMethod::Get, "/download", move |ctx| {
            let producer = Rc::new(ChunkedProducer::new(source.clone(), 4 * 1024));
            let piped = ctx.stream(
                producer,
                200,
                &ReplyHeaders::Preset(HeaderPreset::OctetStream),
            );
            piped.on_settle(|outcome| match outcome {
                Ok(()) => println!("  pipe settled: complete"),
                Err(error) => println!("  pipe settled: {error}"),
            });
            Ok(HandlerOutcome::Sync(Payload::None))
        })],
        ..ServerOptions::default()
    });

    let app = MockApp::new();
    server.listen(app.clone()).expect("configuration is valid");

    // A socket that only accepts 8 KiB between drains.
    let res = MockResponse::new().with_write_capacity(8 * 1024);
    println!("Making request: GET /download (8 KiB socket buffer)");
    app.simulate_on(MockRequest::new("GET", "/download"), res.clone());

    let mut drains = 0;
    while !res.is_ended() {
        res.drain_writable();
        drains += 1;
        assert!(drains < 1_000, "stream must finish");
    }

    println!("  drains needed: {drains}");
    println!("  bytes on the wire: {}", res.body_bytes().len());
    assert_eq!(res.body_bytes(), payload, "byte-exact streamed payload");
    assert_eq!(
        res.header("content-type").as_deref(),
        Some("application/octet-stream")
    );

    let metrics = server.metrics();
    assert_eq!(metrics.active_http, 0, "request finalized");
    assert_eq!(metrics.pooled_http, 1, "context recycled");

    println!("\nAll assertions passed!");
}
