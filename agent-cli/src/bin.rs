//! Host-local message-forwarding agent
//!
//! Accepts JSON messages from co-resident applications over a local stream
//! socket and forwards them, in adaptively sized batches, to a remote HTTP
//! ingest API.
use tendrl_agent::Error;
use tendrl_cmd::run;

#[tokio::main]
async fn main() -> Result<(), Error> {
    run().await
}
