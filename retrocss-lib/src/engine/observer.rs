//! Debounced observation of document mutations.

use crate::dom::dom_tree::{attribute, descendant_elements, Document, MutationRecord, NodeRef};
use crate::engine::oklch_fallback::has_inline_oklch;
use crate::transform::color::contains_oklch;
use log::trace;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep_until, Instant};

/// Turns the document's mutation records into debounced reprocessing
/// requests. Qualifying records inside one debounce window collapse into a
/// single batch; the window restarts on every qualifying record.
pub struct ChangeObserver {
    records: UnboundedReceiver<MutationRecord>,
    debounce: Duration,
}

impl ChangeObserver {
    /// Subscribe to `document`. Only one observer is attached at a time;
    /// attaching again replaces the previous subscription.
    pub fn attach(document: &Document, debounce: Duration) -> Self {
        ChangeObserver {
            records: document.observe(),
            debounce,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Wait for the next batch of qualifying mutations and return how many
    /// records it held. `None` once the document stops reporting.
    pub async fn next_batch(&mut self) -> Option<usize> {
        loop {
            let record = self.records.recv().await?;
            if qualifies(&record) {
                break;
            }
        }
        let mut count = 1;
        let mut deadline = Instant::now() + self.debounce;
        loop {
            tokio::select! {
                record = self.records.recv() => match record {
                    Some(record) if qualifies(&record) => {
                        count += 1;
                        deadline = Instant::now() + self.debounce;
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = sleep_until(deadline) => break,
            }
        }
        trace!("observer batch of {} qualifying records", count);
        Some(count)
    }

    /// Drain the records queued so far without waiting. Returns the number
    /// that qualify.
    pub fn take_pending(&mut self) -> usize {
        let mut count = 0;
        loop {
            match self.records.try_recv() {
                Ok(record) => {
                    if qualifies(&record) {
                        count += 1;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return count,
            }
        }
    }
}

fn is_style_source(node: &NodeRef) -> bool {
    node.borrow()
        .as_element()
        .map(|elem| elem.tag == "style" || elem.is_stylesheet_link())
        .unwrap_or(false)
}

/// Whether a record can change what a pass would do: stylesheet elements
/// added (directly or inside a subtree), stylesheet links changing `href`
/// or `rel`, and inline `oklch()` appearing.
pub fn qualifies(record: &MutationRecord) -> bool {
    match record {
        MutationRecord::ChildList { added, .. } => added.iter().any(|node| {
            is_style_source(node)
                || descendant_elements(node).iter().any(is_style_source)
                || has_inline_oklch(node)
        }),
        MutationRecord::Attributes { target, name } => match name.as_str() {
            "href" | "rel" => target
                .borrow()
                .as_element()
                .map(|elem| elem.tag == "link")
                .unwrap_or(false),
            "style" => attribute(target, "style")
                .map(|style| contains_oklch(&style))
                .unwrap_or(false),
            _ => false,
        },
    }
}
