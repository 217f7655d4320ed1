//! Terminal confirmation sink: an interactive y/n loop resolving to the
//! five-way `ConfirmationDecision` set, kept to plain text with no
//! box-drawing banner or emoji.

use std::io::{self, Write};

use async_trait::async_trait;
use wayforge_tools::confirm::{ConfirmationDecision, ConfirmationPreview, UserInteractionSink};

pub struct TerminalSink;

#[async_trait]
impl UserInteractionSink for TerminalSink {
    async fn prompt(&self, preview: &ConfirmationPreview) -> ConfirmationDecision {
        eprintln!("{} {}: {}", preview.tool_name, preview.label, preview.detail);
        eprint!("allow this call? [y]es/[n]o/[t]rust-project/trust-[!]global/[a]bort: ");
        let _ = io::stderr().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() || input.is_empty() {
            return ConfirmationDecision::Abort;
        }
        ConfirmationDecision::parse(&input)
    }
}
