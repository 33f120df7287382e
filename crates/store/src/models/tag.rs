//! Generic tagging.
//!
//! A [`TaggedItem`] points at any entity through `(content_type, object_id)`,
//! where `content_type` is the model name (`"product"`, `"collection"`, ...).

use serde::Serialize;
use storefront_core::{TagId, TaggedItemId};

use crate::db::schema::{FieldKind, FieldMeta, ModelMeta, OnDelete, RelationKind, RelationMeta};
use crate::db::{Col, ForeignKey, Many, Model, Record, Result};

static TAG: ModelMeta = ModelMeta {
    name: "tag",
    table: "tags_tag",
    fields: &[
        FieldMeta::new("id", FieldKind::Integer),
        FieldMeta::new("label", FieldKind::Text),
    ],
    relations: &[RelationMeta {
        name: "items",
        target: tagged_item_meta,
        kind: RelationKind::Reverse { column: "tag_id" },
    }],
};

static TAGGED_ITEM: ModelMeta = ModelMeta {
    name: "taggeditem",
    table: "tags_taggeditem",
    fields: &[
        FieldMeta::new("id", FieldKind::Integer),
        FieldMeta::new("tag_id", FieldKind::Integer),
        FieldMeta::new("content_type", FieldKind::Text),
        FieldMeta::new("object_id", FieldKind::Integer),
    ],
    relations: &[RelationMeta {
        name: "tag",
        target: tag_meta,
        kind: RelationKind::ForeignKey {
            column: "tag_id",
            on_delete: OnDelete::Cascade,
        },
    }],
};

pub fn tag_meta() -> &'static ModelMeta {
    &TAG
}

pub fn tagged_item_meta() -> &'static ModelMeta {
    &TAGGED_ITEM
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub id: TagId,
    pub label: String,
}

impl Tag {
    pub const ID: Col<Self, TagId> = Col::new("id");
    pub const LABEL: Col<Self, String> = Col::new("label");

    pub const ITEMS: Many<Self, TaggedItem> = Many::new("items");
}

impl Model for Tag {
    fn meta() -> &'static ModelMeta {
        &TAG
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            label: record.get("label")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedItem {
    pub id: TaggedItemId,
    pub tag_id: TagId,
    pub content_type: String,
    pub object_id: i32,
    /// Present when loaded with `select_related(TaggedItem::TAG)`.
    pub tag: Option<Tag>,
}

impl TaggedItem {
    pub const ID: Col<Self, TaggedItemId> = Col::new("id");
    pub const TAG_ID: Col<Self, TagId> = Col::new("tag_id");
    pub const CONTENT_TYPE: Col<Self, String> = Col::new("content_type");
    pub const OBJECT_ID: Col<Self, i32> = Col::new("object_id");

    pub const TAG: ForeignKey<Self, Tag> = ForeignKey::new("tag");
}

impl Model for TaggedItem {
    fn meta() -> &'static ModelMeta {
        &TAGGED_ITEM
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            tag_id: record.get("tag_id")?,
            content_type: record.get("content_type")?,
            object_id: record.get("object_id")?,
            tag: record.related("tag").map(Tag::from_record).transpose()?,
        })
    }
}
