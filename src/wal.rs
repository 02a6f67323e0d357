use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on one encoded record; a larger length prefix is treated as corruption.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Write one framed record, returning the number of bytes it occupies.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(payload.len() as u64 + 8)
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Append-only log of calendar events.
///
/// Each record is `[u32 le: len][bincode: Event][u32 le: crc32 of payload]`.
/// A torn or corrupt tail record is dropped on replay, so a crash mid-write
/// loses at most the unacknowledged batch.
///
/// Records buffered since the last successful `flush_sync` are not part of
/// the log until that flush succeeds. After a failure, `discard_unsynced`
/// drops them and cuts the file back to its last synced length.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length as of the last successful `flush_sync`.
    synced_len: u64,
    unsynced_bytes: u64,
    unsynced_records: u64,
    /// A rollback failed; the next append retries it first.
    needs_rollback: bool,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = open_append(path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            synced_len,
            unsynced_bytes: 0,
            unsynced_records: 0,
            needs_rollback: false,
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.needs_rollback {
            self.discard_unsynced()?;
        }
        self.unsynced_bytes += encode_event(&mut self.writer, event)?;
        self.unsynced_records += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len += self.unsynced_bytes;
        self.appends_since_compact += self.unsynced_records;
        self.unsynced_bytes = 0;
        self.unsynced_records = 0;
        Ok(())
    }

    /// Drop every record written since the last successful `flush_sync`,
    /// both still-buffered bytes and any that already reached the file.
    pub fn discard_unsynced(&mut self) -> io::Result<()> {
        self.needs_rollback = true;
        let file = open_append(&self.path)?;
        // into_parts hands back the buffer without flushing it.
        let (_, _stale) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();
        self.unsynced_bytes = 0;
        self.unsynced_records = 0;
        let file = self.writer.get_ref();
        if file.metadata()?.len() != self.synced_len {
            file.set_len(self.synced_len)?;
            file.sync_all()?;
        }
        self.needs_rollback = false;
        Ok(())
    }

    /// Swap in a handle that rejects writes, so the next flush fails.
    #[cfg(test)]
    pub(crate) fn break_writes(&mut self) -> io::Result<()> {
        self.writer = BufWriter::new(File::open(&self.path)?);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the compacted event set to a sibling temp file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = open_append(&self.path)?;
        self.synced_len = file.metadata()?.len();
        let (_, _stale) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();
        self.unsynced_bytes = 0;
        self.unsynced_records = 0;
        self.needs_rollback = false;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact record. A missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_RECORD_LEN {
                tracing::warn!(path = %path.display(), len, "oversized WAL record, dropping tail");
                break;
            }

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }
            let stored_crc = u32::from_le_bytes(crc_buf);
            let computed_crc = crc32fast::hash(&payload);

            if stored_crc != computed_crc {
                tracing::warn!(path = %path.display(), replayed = events.len(), "WAL checksum mismatch, dropping tail");
                break;
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "undecodable WAL record, dropping tail");
                    break;
                }
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AvailabilityInterval, DayRange};
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("stayline_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    fn opened(listing_id: Ulid, start: NaiveDate, end: NaiveDate) -> Event {
        Event::DatesOpened {
            interval: AvailabilityInterval::new(listing_id, start, end),
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let lid = Ulid::new();
        let open = AvailabilityInterval::new(lid, d(6, 1), d(6, 30));
        let events = vec![
            Event::DatesOpened { interval: open.clone() },
            Event::BookingConfirmed {
                id: Ulid::new(),
                listing_id: lid,
                consumed: open.id,
                remainders: vec![AvailabilityInterval::new(lid, d(6, 1), d(6, 9))],
                held_days: DayRange::new(d(6, 10), d(6, 30)),
                rejected: vec![Ulid::new()],
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let event = opened(Ulid::new(), d(6, 1), d(6, 30));
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_checksum() {
        let path = tmp_path("bad_crc.wal");
        let good = opened(Ulid::new(), d(7, 1), d(7, 31));
        let bad = Event::BookingCompleted {
            id: Ulid::new(),
            listing_id: Ulid::new(),
        };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&bad).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_rejects_oversized_length_prefix() {
        let path = tmp_path("oversized.wal");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_replaces_history() {
        let path = tmp_path("compact.wal");
        let lid = Ulid::new();
        {
            let mut wal = Wal::open(&path).unwrap();
            for day in 1..=20 {
                let e = opened(lid, d(8, day), d(8, day));
                wal.append(&e).unwrap();
                if let Event::DatesOpened { interval } = e {
                    wal.append(&Event::DatesWithdrawn {
                        id: interval.id,
                        listing_id: lid,
                    })
                    .unwrap();
                }
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![opened(lid, d(9, 1), d(9, 30))];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&snapshot).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should shrink: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), snapshot);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_after_compact_lands_in_new_file() {
        let path = tmp_path("compact_then_append.wal");
        let lid = Ulid::new();
        let snapshot = vec![opened(lid, d(6, 1), d(6, 30))];
        let later = opened(lid, d(7, 1), d(7, 31));
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&snapshot[0]).unwrap();
            wal.compact(&snapshot).unwrap();
            wal.append(&later).unwrap();
            assert_eq!(wal.appends_since_compact(), 1);
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![snapshot[0].clone(), later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_durable_after_flush() {
        let path = tmp_path("buffered.wal");
        let lid = Ulid::new();
        let events: Vec<Event> = (1..=5).map(|m| opened(lid, d(m, 1), d(m, 20))).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 0);
            wal.flush_sync().unwrap();
            assert_eq!(wal.appends_since_compact(), 5);
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn failed_flush_leaves_nothing_for_the_next_batch() {
        let path = tmp_path("failed_flush.wal");
        let lid = Ulid::new();
        let kept = opened(lid, d(6, 1), d(6, 30));
        let rejected = opened(lid, d(7, 1), d(7, 31));
        let later = opened(lid, d(8, 1), d(8, 31));
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();

            wal.break_writes().unwrap();
            wal.append_buffered(&rejected).unwrap();
            assert!(wal.flush_sync().is_err());
            wal.discard_unsynced().unwrap();

            wal.append(&later).unwrap();
            assert_eq!(wal.appends_since_compact(), 2);
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn discard_truncates_bytes_that_reached_the_file() {
        let path = tmp_path("discard_truncates.wal");
        let lid = Ulid::new();
        let kept = opened(lid, d(6, 1), d(6, 30));
        let later = opened(lid, d(8, 1), d(8, 31));
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();
        let synced = fs::metadata(&path).unwrap().len();

        // Half a record written straight through, as a short write would leave it.
        wal.append_buffered(&opened(lid, d(7, 1), d(7, 31))).unwrap();
        wal.writer.get_mut().write_all(&[42u8; 7]).unwrap();
        wal.discard_unsynced().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), synced);

        wal.append(&later).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, later]);
        let _ = fs::remove_file(&path);
    }
}
