//! In-memory spreadsheet with fault and latency injection.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use sheetsync_engine::Position;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Cells, RemoteError, RemoteStore, WriteConfirmation};

/// Remote operations, for call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Read,
    ReadRows,
    Write,
    Append,
    DeleteRow,
    EnsureSheet,
    SheetTitles,
}

/// A spreadsheet held in memory.
///
/// Behaves like the Sheets API where it matters to the engine: reads trim
/// trailing empty cells and rows, appends land after the last non-empty row,
/// deletes shift later rows up. Every call is counted, including calls that
/// fail through an injected fault.
#[derive(Default)]
pub struct MemorySheets {
    sheets: DashMap<String, Vec<Cells>>,
    /// Injected failures, each optionally limited to one kind of call
    faults: Mutex<VecDeque<(Option<Op>, RemoteError)>>,
    lost_replies: Mutex<VecDeque<RemoteError>>,
    latency: Mutex<Duration>,
    calls: DashMap<Op, AtomicUsize>,
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sheet holding `rows` (header first).
    pub fn with_sheet(self, title: impl Into<String>, rows: Vec<Vec<&str>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(str::to_string).collect())
            .collect();
        self.sheets.insert(title.into(), rows);
        self
    }

    /// Fail the next call with `error`. Faults queue up in order.
    pub fn push_fault(&self, error: RemoteError) {
        self.faults.lock().push_back((None, error));
    }

    /// Fail the next `op` call with `error`. Other calls pass until it fires.
    pub fn push_fault_on(&self, op: Op, error: RemoteError) {
        self.faults.lock().push_back((Some(op), error));
    }

    /// Fail the next `n` calls with `error`.
    pub fn fail_next(&self, n: usize, error: RemoteError) {
        let mut faults = self.faults.lock();
        faults.extend(std::iter::repeat((None, error)).take(n));
    }

    /// Apply the next write, append or row delete, then fail it with
    /// `error` as if the reply never arrived.
    pub fn lose_next_reply(&self, error: RemoteError) {
        self.lost_replies.lock().push_back(error);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
        self.lost_replies.lock().clear();
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of calls made for `op`.
    pub fn calls(&self, op: Op) -> usize {
        self.calls
            .get(&op)
            .map_or(0, |count| count.load(Ordering::SeqCst))
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .iter()
            .map(|entry| entry.value().load(Ordering::SeqCst))
            .sum()
    }

    /// Current content of a sheet as stored (untrimmed).
    pub fn rows(&self, title: &str) -> Vec<Cells> {
        self.sheets
            .get(title)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    /// Edit a sheet directly, as another user of the spreadsheet would.
    pub fn edit<R>(&self, title: &str, f: impl FnOnce(&mut Vec<Cells>) -> R) -> R {
        let mut rows = self.sheets.entry(title.to_string()).or_default();
        f(&mut rows)
    }

    async fn enter(&self, op: Op) -> Result<(), RemoteError> {
        self.calls
            .entry(op)
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut faults = self.faults.lock();
        match faults.front() {
            Some((target, _)) if target.is_none() || *target == Some(op) => {
                faults.pop_front().map_or(Ok(()), |(_, error)| Err(error))
            }
            _ => Ok(()),
        }
    }

    fn reply<T>(&self, value: T) -> Result<T, RemoteError> {
        match self.lost_replies.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(value),
        }
    }

    fn missing(title: &str) -> RemoteError {
        RemoteError::NotFound(format!("sheet '{title}'"))
    }
}

fn trim_row(row: &[String]) -> Cells {
    let len = row
        .iter()
        .rposition(|c| !c.is_empty())
        .map_or(0, |i| i + 1);
    row[..len].to_vec()
}

fn trimmed(rows: &[Cells]) -> Vec<Cells> {
    let mut out: Vec<Cells> = rows.iter().map(|r| trim_row(r)).collect();
    while out.last().is_some_and(|r| r.is_empty()) {
        out.pop();
    }
    out
}

#[async_trait]
impl RemoteStore for MemorySheets {
    async fn read(&self, sheet: &str) -> Result<Vec<Cells>, RemoteError> {
        self.enter(Op::Read).await?;
        let rows = self.sheets.get(sheet).ok_or_else(|| Self::missing(sheet))?;
        Ok(trimmed(&rows))
    }

    async fn read_rows(
        &self,
        sheet: &str,
        first: Position,
        last: Position,
    ) -> Result<Vec<Cells>, RemoteError> {
        self.enter(Op::ReadRows).await?;
        if first == 0 || last < first {
            return Err(RemoteError::Rejected(format!("invalid row range {first}:{last}")));
        }
        let rows = self.sheets.get(sheet).ok_or_else(|| Self::missing(sheet))?;
        let all = trimmed(&rows);
        let start = (first as usize - 1).min(all.len());
        let end = (last as usize).min(all.len());
        Ok(all[start..end].to_vec())
    }

    async fn write(
        &self,
        sheet: &str,
        start_row: Position,
        rows: Vec<Cells>,
    ) -> Result<WriteConfirmation, RemoteError> {
        self.enter(Op::Write).await?;
        if start_row == 0 {
            return Err(RemoteError::Rejected("row 0 does not exist".into()));
        }
        let mut sheet_rows = self
            .sheets
            .get_mut(sheet)
            .ok_or_else(|| Self::missing(sheet))?;
        let count = rows.len();
        for (offset, row) in rows.into_iter().enumerate() {
            let index = start_row as usize - 1 + offset;
            if sheet_rows.len() <= index {
                sheet_rows.resize(index + 1, Vec::new());
            }
            sheet_rows[index] = row;
        }
        drop(sheet_rows);
        self.reply(WriteConfirmation {
            start_row,
            rows: count,
        })
    }

    async fn append(&self, sheet: &str, row: Cells) -> Result<Position, RemoteError> {
        self.enter(Op::Append).await?;
        let mut sheet_rows = self
            .sheets
            .get_mut(sheet)
            .ok_or_else(|| Self::missing(sheet))?;
        let index = trimmed(&sheet_rows).len();
        if sheet_rows.len() <= index {
            sheet_rows.resize(index + 1, Vec::new());
        }
        sheet_rows[index] = row;
        drop(sheet_rows);
        self.reply(index as Position + 1)
    }

    async fn delete_row(&self, sheet: &str, row: Position) -> Result<(), RemoteError> {
        self.enter(Op::DeleteRow).await?;
        let mut sheet_rows = self
            .sheets
            .get_mut(sheet)
            .ok_or_else(|| Self::missing(sheet))?;
        if row == 0 || row as usize > sheet_rows.len() {
            return Err(RemoteError::Rejected(format!(
                "row {row} is outside the sheet"
            )));
        }
        sheet_rows.remove(row as usize - 1);
        drop(sheet_rows);
        self.reply(())
    }

    async fn ensure_sheet(&self, sheet: &str) -> Result<bool, RemoteError> {
        self.enter(Op::EnsureSheet).await?;
        if self.sheets.contains_key(sheet) {
            return Ok(false);
        }
        self.sheets.insert(sheet.to_string(), Vec::new());
        Ok(true)
    }

    async fn sheet_titles(&self) -> Result<Vec<String>, RemoteError> {
        self.enter(Op::SheetTitles).await?;
        let mut titles: Vec<String> = self.sheets.iter().map(|e| e.key().clone()).collect();
        titles.sort();
        Ok(titles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheets() -> MemorySheets {
        MemorySheets::new().with_sheet(
            "People",
            vec![vec!["id", "name"], vec!["1", "A"], vec!["2", ""]],
        )
    }

    #[tokio::test]
    async fn reads_trim_like_the_api() {
        let store = sheets();
        store.edit("People", |rows| {
            rows.push(vec![String::new(), String::new()])
        });

        let rows = store.read("People").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], vec!["2".to_string()]);

        let rows = store.read_rows("People", 2, 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(store.read_rows("People", 9, 9).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_lands_after_last_data_row() {
        let store = sheets();
        store.edit("People", |rows| rows.push(Vec::new()));

        let position = store
            .append("People", vec!["3".into(), "C".into()])
            .await
            .unwrap();
        assert_eq!(position, 4);
        assert_eq!(
            store.rows("People")[3],
            vec!["3".to_string(), "C".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_shifts_rows_up() {
        let store = sheets();
        store.delete_row("People", 2).await.unwrap();
        assert_eq!(store.rows("People")[1][0], "2");

        let result = store.delete_row("People", 10).await;
        assert!(matches!(result, Err(RemoteError::Rejected(_))));
    }

    #[tokio::test]
    async fn faults_are_consumed_in_order() {
        let store = sheets();
        store.fail_next(2, RemoteError::Timeout);

        assert!(matches!(store.read("People").await, Err(RemoteError::Timeout)));
        assert!(matches!(store.read("People").await, Err(RemoteError::Timeout)));
        assert!(store.read("People").await.is_ok());
        assert_eq!(store.calls(Op::Read), 3);
        assert_eq!(store.total_calls(), 3);
    }

    #[tokio::test]
    async fn lost_reply_still_applies_the_write() {
        let store = sheets();
        store.lose_next_reply(RemoteError::Timeout);

        let result = store.append("People", vec!["3".into(), "C".into()]).await;
        assert!(matches!(result, Err(RemoteError::Timeout)));
        assert_eq!(store.rows("People").len(), 4);

        store.append("People", vec!["4".into()]).await.unwrap();
        assert_eq!(store.rows("People").len(), 5);
    }

    #[tokio::test]
    async fn targeted_faults_wait_for_their_call() {
        let store = sheets();
        store.push_fault_on(Op::Read, RemoteError::Timeout);

        assert!(store.sheet_titles().await.is_ok());
        assert!(matches!(store.read("People").await, Err(RemoteError::Timeout)));
        assert!(store.read("People").await.is_ok());
    }

    #[tokio::test]
    async fn missing_sheet() {
        let store = MemorySheets::new();
        assert!(matches!(store.read("Nope").await, Err(RemoteError::NotFound(_))));

        assert!(store.ensure_sheet("Nope").await.unwrap());
        assert!(!store.ensure_sheet("Nope").await.unwrap());
        assert_eq!(
            store.sheet_titles().await.unwrap(),
            vec!["Nope".to_string()]
        );
    }
}
