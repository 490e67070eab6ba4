//! Slack integration for the task bot
//!
//! - **Socket Mode** (`socket`) - runner loop over a websocket transport, with reconnection
//! - **Events** (`events`) - envelope parsing, dispatch and reply delivery
//! - **Pipeline** (`pipeline`) - mention, slash command and reaction flows into the task store
//! - **Replies** (`replies`) - was the thread already answered?
//! - **Slash Commands** (`commands`) - `/업무추가 제목 | 담당자 | 마감일`
//! - **Block Kit** (`blocks`) - acknowledgement and failure messages
//! - **Web API** (`api`) - the outbound calls the pipeline needs, as a trait
//!
//! # Architecture
//!
//! ```text
//! Socket Mode / HTTP → EventProcessor → EventDispatcher → Handlers → TaskPipeline
//!                            ↓                                          ↓
//!                    chat.postMessage ← acknowledgement        TaskStore (web app)
//! ```

pub mod api;
pub mod blocks;
pub mod commands;
pub mod events;
pub mod pipeline;
pub mod replies;
pub mod socket;

#[cfg(test)]
mod testing;
