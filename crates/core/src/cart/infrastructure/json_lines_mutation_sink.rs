use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::cart::domain::cart_mutation_sink::{CartDelta, CartMutationSink};

/// Appends each cart delta as one JSON object per line.
pub struct JsonLinesMutationSink<W: Write + Send> {
    writer: W,
}

impl JsonLinesMutationSink<BufWriter<File>> {
    pub fn append_to(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> JsonLinesMutationSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> CartMutationSink for JsonLinesMutationSink<W> {
    fn forward(&mut self, delta: &CartDelta) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        serde_json::to_writer(&mut self.writer, delta)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn delta(change: i64, new_quantity: u32) -> CartDelta {
        CartDelta {
            product_id: 1,
            label: "Botella".to_string(),
            quantity_change: change,
            new_quantity,
            at: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_writes_one_line_per_delta() {
        let mut sink = JsonLinesMutationSink::new(Vec::new());
        sink.forward(&delta(1, 1)).unwrap();
        sink.forward(&delta(-1, 0)).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["label"], "Botella");
        assert_eq!(lines[1]["quantity_change"], -1);
        assert_eq!(lines[1]["new_quantity"], 0);
    }

    #[test]
    fn test_append_to_file_accumulates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("movements.jsonl");

        JsonLinesMutationSink::append_to(&path)
            .unwrap()
            .forward(&delta(1, 1))
            .unwrap();
        JsonLinesMutationSink::append_to(&path)
            .unwrap()
            .forward(&delta(1, 2))
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
