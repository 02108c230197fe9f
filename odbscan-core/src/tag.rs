//! Annotated tag objects

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::OnceCell;

use crate::database::ObjectDatabase;
use crate::error::{Error, Result};
use crate::object::{HeadedText, Object, ObjectId, ObjectKind};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TagData {
    target_id: ObjectId,
    target_kind: ObjectKind,
    name: Bytes,
    tagger_line: Bytes,
    message: Bytes,
}

/// Annotated tag pointing at another object
#[derive(Debug)]
pub struct Tag {
    id: ObjectId,
    data: OnceCell<TagData>,
}

impl Tag {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            data: OnceCell::new(),
        }
    }

    pub fn is_instantiated(&self) -> bool {
        self.data.initialized()
    }

    fn data(&self) -> &TagData {
        match self.data.get() {
            Some(data) => data,
            None => panic!("Tag {} has not been instantiated", self.id),
        }
    }

    pub fn target_id(&self) -> ObjectId {
        self.data().target_id
    }

    pub fn target_kind(&self) -> ObjectKind {
        self.data().target_kind
    }

    pub fn name(&self) -> &[u8] {
        &self.data().name
    }

    /// Whole `tagger ...` line; empty for tags created without a tagger
    pub fn tagger_line(&self) -> &[u8] {
        &self.data().tagger_line
    }

    /// The tag message exactly as recorded, without a trailing newline
    pub fn message(&self) -> &[u8] {
        &self.data().message
    }

    fn parse(&self, text: &Bytes) -> Result<TagData> {
        let parsed = HeadedText::parse(text);

        let mut target_id = None;
        let mut target_kind = None;
        let mut name = None;
        let mut tagger_line = Bytes::new();

        for header in parsed.headers {
            let value = String::from_utf8_lossy(header.value);
            match header.key {
                "object" => {
                    target_id = Some(ObjectId::from_hex(&value).map_err(|_| {
                        Error::format(
                            ObjectKind::Tag,
                            self.id,
                            format!("object header {:?} is not an object id", value),
                        )
                    })?)
                }
                "type" => {
                    target_kind = Some(value.parse::<ObjectKind>().map_err(|e| {
                        Error::format(ObjectKind::Tag, self.id, e.to_string())
                    })?)
                }
                "tag" => name = Some(text.slice_ref(header.value)),
                "tagger" => tagger_line = text.slice_ref(header.line),
                _ => {}
            }
        }

        let missing = |header: &str| Error::format(ObjectKind::Tag, self.id, format!("missing {} header", header));
        Ok(TagData {
            target_id: target_id.ok_or_else(|| missing("object"))?,
            target_kind: target_kind.ok_or_else(|| missing("type"))?,
            name: name.ok_or_else(|| missing("tag"))?,
            tagger_line,
            message: text.slice_ref(parsed.message),
        })
    }
}

#[async_trait]
impl Object for Tag {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Tag
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    async fn instantiate(&self, db: &ObjectDatabase) -> Result<()> {
        self.data
            .get_or_try_init(|| async {
                let text = db
                    .pretty_print(self.id)
                    .await
                    .map_err(|e| e.context(format!("Calling cat-file on tag {}", self.id)))?;
                self.parse(&text)
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{id, MockRunner};
    use std::sync::Arc;

    const TAG: &str = "abababababababababababababababababababab";
    const TARGET: &str = "cccccccccccccccccccccccccccccccccccccccc";

    #[tokio::test]
    async fn test_tag_instantiate() {
        let text = format!(
            "object {}\ntype commit\ntag v1.0\ntagger T Agger <t@example.com> 1700000000 +0000\n\nRelease 1.0\n\nNotes\n",
            TARGET
        );
        let runner = MockRunner::new().respond(&["cat-file", "-p", TAG], text);
        let db = ObjectDatabase::for_tests(Arc::new(runner));

        let tag = Tag::new(id(TAG));
        tag.instantiate(&db).await.unwrap();
        assert_eq!(tag.target_id(), id(TARGET));
        assert_eq!(tag.target_kind(), ObjectKind::Commit);
        assert_eq!(tag.name(), b"v1.0");
        assert_eq!(tag.tagger_line(), b"tagger T Agger <t@example.com> 1700000000 +0000");
        assert_eq!(tag.message(), b"Release 1.0\n\nNotes");
    }

    #[tokio::test]
    async fn test_tag_message_keeps_non_utf8_bytes() {
        let mut text = format!("object {}\ntype commit\ntag v2\n", TARGET).into_bytes();
        text.extend_from_slice(b"tagger Jos\xe9 <j@example.com> 1700000000 +0000\n\nn\xe4chste Version\n");
        let runner = MockRunner::new().respond(&["cat-file", "-p", TAG], text);
        let db = ObjectDatabase::for_tests(Arc::new(runner));

        let tag = Tag::new(id(TAG));
        tag.instantiate(&db).await.unwrap();
        assert_eq!(tag.tagger_line(), b"tagger Jos\xe9 <j@example.com> 1700000000 +0000");
        assert_eq!(tag.message(), b"n\xe4chste Version");
    }

    #[tokio::test]
    async fn test_tag_unknown_target_kind() {
        let text = format!("object {}\ntype gitlink\ntag v1\n\nmsg\n", TARGET);
        let runner = MockRunner::new().respond(&["cat-file", "-p", TAG], text);
        let db = ObjectDatabase::for_tests(Arc::new(runner));

        let tag = Tag::new(id(TAG));
        let err = tag.instantiate(&db).await.unwrap_err();
        assert!(matches!(err, Error::Format { kind: ObjectKind::Tag, .. }));
    }
}
