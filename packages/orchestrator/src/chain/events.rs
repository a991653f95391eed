use alloy::primitives::{Address, B256};

use super::{ChainBackend, ChainError, DynChain, LogRange, RawLog};

/// A paginated, restartable event tail over one contract.
///
/// The cursor is the next block to scan; it is owned and persisted by the
/// caller, which advances it only after its own processing commits. Pages
/// never reach past `head - confirmations`, so shallow re-orgs are not
/// observed.
pub struct EventTail {
    chain: DynChain,
    contract: Address,
    topics: Vec<B256>,
    page_blocks: u64,
    confirmations: u64,
}

/// One page of logs plus the cursor to persist once they are handled.
pub struct EventPage {
    pub logs: Vec<RawLog>,
    pub next_cursor: u64,
}

impl EventTail {
    pub fn new(
        chain: DynChain,
        contract: Address,
        topics: Vec<B256>,
        page_blocks: u64,
        confirmations: u64,
    ) -> Self {
        EventTail {
            chain,
            contract,
            topics,
            page_blocks: page_blocks.max(1),
            confirmations,
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Fetch the next page starting at `cursor`. Returns an empty page
    /// with an unchanged cursor when the chain has not advanced far
    /// enough.
    pub async fn next_page(&self, cursor: u64) -> Result<EventPage, ChainError> {
        let head = self.chain.head().await?;
        let safe_head = head.saturating_sub(self.confirmations);
        if cursor > safe_head {
            return Ok(EventPage {
                logs: Vec::new(),
                next_cursor: cursor,
            });
        }
        let to_block = safe_head.min(cursor.saturating_add(self.page_blocks - 1));
        let mut logs = self
            .chain
            .get_logs(&LogRange {
                contract: self.contract,
                topics: self.topics.clone(),
                from_block: cursor,
                to_block,
            })
            .await?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(EventPage {
            logs,
            next_cursor: to_block + 1,
        })
    }
}
