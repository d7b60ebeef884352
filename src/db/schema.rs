/// Local record storage. Every partition holds an ordered list of
/// JSON-serialized records of one collection.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
  collection TEXT NOT NULL,
  partition TEXT NOT NULL,
  position INTEGER NOT NULL,
  body TEXT NOT NULL,
  PRIMARY KEY (collection, partition, position)
);
"#;
