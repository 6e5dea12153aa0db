//! Link store: validation, exclusivity classes and closure notification.
//!
//! Every mutation runs in one write transaction together with its closure
//! update, so a cycle rejection (or any storage failure) leaves both the
//! link table and the closure index untouched.

use tracing::debug;

use crate::db::{closure, ProvenaDb};
use crate::error::{ProvenaError, Result};
use crate::model::{LinkId, LinkRecord, LinkType, NodeId, NULL_ID};

impl ProvenaDb {
    /// Adds a link `input -> output` and updates the closure index.
    ///
    /// Both endpoints must be persisted nodes. Self-links are rejected, as
    /// are violations of the link-type exclusivity classes and insertions
    /// that would close a directed cycle.
    pub fn add_link(
        &self,
        input: NodeId,
        output: NodeId,
        link_type: LinkType,
        label: impl Into<String>,
    ) -> Result<LinkId> {
        let label = label.into();
        let id = self.context().write(|tx| {
            if tx.node(input)?.is_none() || tx.node(output)?.is_none() {
                return Err(ProvenaError::NotFound("link endpoint node"));
            }
            if input == output {
                return Err(ProvenaError::InvalidArgument(format!(
                    "self-link on node {input}"
                )));
            }
            let incoming = tx.links_into(output)?;
            if link_type.label_unique_on_output()
                && incoming
                    .iter()
                    .any(|l| l.link_type == link_type && l.label == label)
            {
                return Err(ProvenaError::InvalidArgument(format!(
                    "node {output} already has a {} link labeled '{label}'",
                    link_type.as_str()
                )));
            }
            if link_type.single_incoming()
                && incoming.iter().any(|l| l.link_type == link_type)
            {
                return Err(ProvenaError::InvalidArgument(format!(
                    "node {output} already has an incoming {} link",
                    link_type.as_str()
                )));
            }

            let rec = LinkRecord {
                id: NULL_ID,
                input_id: input,
                output_id: output,
                label: label.clone(),
                link_type,
            };
            let id = tx.insert_link(&rec)?;
            closure::notify_link_inserted(tx, &rec)?;
            Ok(id)
        })?;
        debug!(id, input, output, link_type = link_type.as_str(), "link.add");
        Ok(id)
    }

    /// Removes a link by id, purging the closure rows that depended on it.
    pub fn remove_link(&self, id: LinkId) -> Result<()> {
        self.context().write(|tx| {
            let rec = tx.link(id)?.ok_or(ProvenaError::NotFound("link"))?;
            closure::notify_link_before_delete(tx, &rec)?;
            tx.delete_link(id)?;
            debug!(id, input = rec.input_id, output = rec.output_id, "link.remove");
            Ok(())
        })
    }

    /// Removes the link `input -> output` with the given label.
    pub fn remove_link_between(
        &self,
        input: NodeId,
        output: NodeId,
        label: &str,
    ) -> Result<()> {
        self.context().write(|tx| {
            let rec = tx
                .links_from(input)?
                .into_iter()
                .find(|l| l.output_id == output && l.label == label)
                .ok_or(ProvenaError::NotFound("link"))?;
            closure::notify_link_before_delete(tx, &rec)?;
            tx.delete_link(rec.id)?;
            Ok(())
        })
    }

    /// Links leaving `node`.
    pub fn outgoing_links(&self, node: NodeId) -> Result<Vec<LinkRecord>> {
        self.context().read(|tx| tx.links_from(node))
    }

    /// Links entering `node`.
    pub fn incoming_links(&self, node: NodeId) -> Result<Vec<LinkRecord>> {
        self.context().read(|tx| tx.links_into(node))
    }

    /// Whether `child` is transitively reachable from `parent`.
    pub fn is_reachable(&self, parent: NodeId, child: NodeId) -> Result<bool> {
        self.context()
            .read(|tx| closure::is_reachable(tx, parent, child))
    }

    /// Number of distinct witnessed paths from `parent` to `child`.
    pub fn path_count(&self, parent: NodeId, child: NodeId) -> Result<u64> {
        self.context()
            .read(|tx| closure::path_count(tx, parent, child))
    }
}
