/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
#![allow(dead_code)]

use std::sync::Once;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub mod gateway;
pub mod handlers;

// Ensures tracing initialization happens only once across all tests.
static INIT: Once = Once::new();

/// Initializes the global tracing subscriber for tests.
///
/// Logs go to `logs/bridge_tests.txt` through a non-blocking appender.
pub fn initialize_tracing() {
    INIT.call_once(|| {
        std::fs::create_dir_all("logs").expect("could not create logs dir");

        let file_appender = RollingFileAppender::new(Rotation::NEVER, "logs", "bridge_tests.txt");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leak the guard so the non-blocking writer outlives every test.
        Box::leak(Box::new(guard));

        let filter = EnvFilter::new("info")
            .add_directive("acton_gateway_bridge=trace".parse().unwrap())
            .add_directive("correlation_tests=trace".parse().unwrap())
            .add_directive("registry_tests=trace".parse().unwrap())
            .add_directive("dispatcher_tests=trace".parse().unwrap());

        let subscriber = FmtSubscriber::builder()
            .with_span_events(FmtSpan::NONE)
            .with_max_level(Level::TRACE)
            .compact()
            .with_line_number(true)
            .without_time()
            .with_target(true)
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}

/// Decodes a frame the bridge queued on its outbound channel.
pub async fn decode_outbound(
    frame: &acton_gateway_bridge::common::OutboundFrame,
) -> anyhow::Result<Box<dyn acton_gateway_bridge::traits::BridgeMessage>> {
    let mut bytes = frame.bytes();
    let (envelope, _) = acton_gateway_bridge::message::read_message(
        &mut bytes,
        acton_gateway_bridge::message::MAX_FRAME_SIZE,
    )
    .await?;
    Ok(acton_gateway_bridge::message::MessageTypeRegistry::with_catalog().decode(&envelope)?)
}
