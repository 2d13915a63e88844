use crate::error::{Error, Result};
use crate::varint::{put_bytes, put_uvarint, Cursor};

/// Every manifest frame starts with these four bytes.
pub const EDIT_MAGIC: [u8; 4] = *b"NoKV";

const LEN_SIZE: usize = 4;
const MAGIC_SIZE: usize = 4;
const TYPE_SIZE: usize = 1;
const CRC_SIZE: usize = 4;

/// Discriminant of an `Edit` on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditType {
    AddFile = 1,
    DeleteFile = 2,
    LogPointer = 3,
    ValueLogHead = 4,
    ValueLogDelete = 5,
    ValueLogUpdate = 6,
    RaftPointer = 7,
    Region = 8,
}

impl EditType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(EditType::AddFile),
            2 => Ok(EditType::DeleteFile),
            3 => Ok(EditType::LogPointer),
            4 => Ok(EditType::ValueLogHead),
            5 => Ok(EditType::ValueLogDelete),
            6 => Ok(EditType::ValueLogUpdate),
            7 => Ok(EditType::RaftPointer),
            8 => Ok(EditType::Region),
            _ => Err(Error::UnknownEditType(byte)),
        }
    }
}

/// Metadata about an SSTable file, stored in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileMeta {
    /// Level this table belongs to (0 = freshly flushed).
    pub level: u32,
    pub file_id: u64,
    /// File size in bytes.
    pub size: u64,
    /// Smallest internal key in the table.
    pub smallest: Vec<u8>,
    /// Largest internal key in the table.
    pub largest: Vec<u8>,
    /// Unix seconds.
    pub created_at: u64,
    /// Bytes of values this table references in the value log.
    pub value_size: u64,
    /// Ingested from outside rather than flushed or compacted.
    pub ingest: bool,
}

/// Identity of one value-log segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ValueLogId {
    pub bucket: u32,
    pub file_id: u32,
}

/// Status of one value-log segment. Deleted segments stay as tombstones
/// (`valid == false`) so their identity remains addressable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ValueLogMeta {
    pub bucket: u32,
    pub file_id: u32,
    /// Write head offset within the segment.
    pub offset: u64,
    pub valid: bool,
}

impl ValueLogMeta {
    pub fn id(&self) -> ValueLogId {
        ValueLogId {
            bucket: self.bucket,
            file_id: self.file_id,
        }
    }
}

/// Where one raft group's state lives in the WAL, plus its applied,
/// snapshot and truncation marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RaftLogPointer {
    pub group_id: u64,
    /// WAL segment of the group's latest persisted record.
    pub segment: u32,
    /// Offset of that record within `segment`.
    pub offset: u64,
    pub applied_index: u64,
    pub applied_term: u64,
    pub committed: u64,
    pub snapshot_index: u64,
    pub snapshot_term: u64,
    pub truncated_index: u64,
    pub truncated_term: u64,
    /// Oldest WAL segment still holding an untruncated record of the group;
    /// 0 when the group never truncated.
    pub segment_index: u64,
    pub truncated_offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegionEpoch {
    pub version: u64,
    pub conf_version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Peer {
    pub store_id: u64,
    pub peer_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RegionState {
    #[default]
    New = 0,
    Running = 1,
    Removing = 2,
    Tombstone = 3,
}

impl RegionState {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(RegionState::New),
            1 => Ok(RegionState::Running),
            2 => Ok(RegionState::Removing),
            3 => Ok(RegionState::Tombstone),
            _ => Err(Error::Corruption(format!("invalid region state: {byte}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegionMeta {
    pub id: u64,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub epoch: RegionEpoch,
    pub peers: Vec<Peer>,
    pub state: RegionState,
}

/// Upsert or delete of a region. When `delete` is set only `meta.id` is
/// meaningful (and only the id is encoded).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegionEdit {
    pub meta: RegionMeta,
    pub delete: bool,
}

/// One atomic, typed mutation of the manifest.
///
/// Frame:
/// ```text
/// ┌────────────┬────────────┬──────────┬──────────────────┬──────────┐
/// │ Length(4B) │ "NoKV"(4B) │ Type(1B) │ type fields (var)│ CRC (4B) │
/// └────────────┴────────────┴──────────┴──────────────────┴──────────┘
/// ```
///
/// Length and CRC are little-endian; Length counts magic + type + fields and
/// the CRC covers the same bytes. Integers inside the fields are uvarints;
/// byte strings are uvarint length + raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    AddFile(FileMeta),
    DeleteFile(FileMeta),
    /// WAL replay cursor.
    LogPointer { segment: u32, offset: u64 },
    ValueLogHead(ValueLogMeta),
    ValueLogDelete(ValueLogMeta),
    ValueLogUpdate(ValueLogMeta),
    RaftPointer(RaftLogPointer),
    Region(RegionEdit),
}

impl Edit {
    pub fn edit_type(&self) -> EditType {
        match self {
            Edit::AddFile(_) => EditType::AddFile,
            Edit::DeleteFile(_) => EditType::DeleteFile,
            Edit::LogPointer { .. } => EditType::LogPointer,
            Edit::ValueLogHead(_) => EditType::ValueLogHead,
            Edit::ValueLogDelete(_) => EditType::ValueLogDelete,
            Edit::ValueLogUpdate(_) => EditType::ValueLogUpdate,
            Edit::RaftPointer(_) => EditType::RaftPointer,
            Edit::Region(_) => EditType::Region,
        }
    }

    /// Serialize this edit as one complete frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let len_at = buf.len();
        buf.extend_from_slice(&[0u8; LEN_SIZE]);

        let body_start = buf.len();
        buf.extend_from_slice(&EDIT_MAGIC);
        buf.push(self.edit_type() as u8);
        self.encode_fields(buf);

        let body_len = (buf.len() - body_start) as u32;
        buf[len_at..len_at + LEN_SIZE].copy_from_slice(&body_len.to_le_bytes());
        let crc = crc32fast::hash(&buf[body_start..]);
        buf.extend_from_slice(&crc.to_le_bytes());
    }

    fn encode_fields(&self, buf: &mut Vec<u8>) {
        match self {
            Edit::AddFile(file) | Edit::DeleteFile(file) => {
                put_uvarint(buf, u64::from(file.level));
                put_uvarint(buf, file.file_id);
                put_uvarint(buf, file.size);
                put_bytes(buf, &file.smallest);
                put_bytes(buf, &file.largest);
                put_uvarint(buf, file.created_at);
                put_uvarint(buf, file.value_size);
                buf.push(u8::from(file.ingest));
            }
            Edit::LogPointer { segment, offset } => {
                put_uvarint(buf, u64::from(*segment));
                put_uvarint(buf, *offset);
            }
            Edit::ValueLogHead(meta) | Edit::ValueLogDelete(meta) | Edit::ValueLogUpdate(meta) => {
                put_uvarint(buf, u64::from(meta.bucket));
                put_uvarint(buf, u64::from(meta.file_id));
                put_uvarint(buf, meta.offset);
                buf.push(u8::from(meta.valid));
            }
            Edit::RaftPointer(ptr) => {
                put_uvarint(buf, ptr.group_id);
                put_uvarint(buf, u64::from(ptr.segment));
                put_uvarint(buf, ptr.offset);
                put_uvarint(buf, ptr.applied_index);
                put_uvarint(buf, ptr.applied_term);
                put_uvarint(buf, ptr.committed);
                put_uvarint(buf, ptr.snapshot_index);
                put_uvarint(buf, ptr.snapshot_term);
                put_uvarint(buf, ptr.truncated_index);
                put_uvarint(buf, ptr.truncated_term);
                put_uvarint(buf, ptr.segment_index);
                put_uvarint(buf, ptr.truncated_offset);
            }
            Edit::Region(edit) => {
                buf.push(u8::from(edit.delete));
                put_uvarint(buf, edit.meta.id);
                if edit.delete {
                    return;
                }
                let meta = &edit.meta;
                put_bytes(buf, &meta.start_key);
                put_bytes(buf, &meta.end_key);
                put_uvarint(buf, meta.epoch.version);
                put_uvarint(buf, meta.epoch.conf_version);
                put_uvarint(buf, meta.peers.len() as u64);
                for peer in &meta.peers {
                    put_uvarint(buf, peer.store_id);
                    put_uvarint(buf, peer.peer_id);
                }
                buf.push(meta.state as u8);
            }
        }
    }

    /// Decode one frame from the front of `data`. Returns the edit and the
    /// number of bytes consumed.
    ///
    /// `Truncated` means the frame is incomplete (a torn tail); `BadMagic`
    /// and `Checksum` mean it is damaged. A frame that passes its CRC but
    /// whose fields do not parse is reported as `Corruption`.
    pub fn decode(data: &[u8]) -> Result<(Edit, usize)> {
        if data.len() < LEN_SIZE {
            return Err(Error::Truncated("edit length".into()));
        }
        let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

        if data.len() >= LEN_SIZE + MAGIC_SIZE {
            let magic = &data[LEN_SIZE..LEN_SIZE + MAGIC_SIZE];
            if magic != EDIT_MAGIC {
                return Err(Error::BadMagic(u32::from_be_bytes([
                    magic[0], magic[1], magic[2], magic[3],
                ])));
            }
        }
        if body_len < MAGIC_SIZE + TYPE_SIZE {
            return Err(Error::Corruption(format!("edit frame of {body_len} bytes")));
        }

        let total = LEN_SIZE + body_len + CRC_SIZE;
        if data.len() < total {
            return Err(Error::Truncated(format!(
                "edit needs {total} bytes, have {}",
                data.len()
            )));
        }

        let body = &data[LEN_SIZE..LEN_SIZE + body_len];
        let crc_at = LEN_SIZE + body_len;
        let expected = u32::from_le_bytes([
            data[crc_at],
            data[crc_at + 1],
            data[crc_at + 2],
            data[crc_at + 3],
        ]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(Error::Checksum { expected, actual });
        }

        let edit_type = EditType::from_u8(body[MAGIC_SIZE])?;
        let fields = &body[MAGIC_SIZE + TYPE_SIZE..];
        let edit = Edit::decode_fields(edit_type, fields).map_err(|e| match e {
            Error::Truncated(reason) => {
                Error::Corruption(format!("{edit_type:?} edit fields truncated: {reason}"))
            }
            other => other,
        })?;
        Ok((edit, total))
    }

    /// Decode the type-specific fields of an edit. Every field must be
    /// consumed; short input is `Truncated`.
    pub fn decode_fields(edit_type: EditType, fields: &[u8]) -> Result<Edit> {
        let mut cur = Cursor::new(fields);
        let edit = match edit_type {
            EditType::AddFile | EditType::DeleteFile => {
                let file = FileMeta {
                    level: cur.uvarint_u32()?,
                    file_id: cur.uvarint()?,
                    size: cur.uvarint()?,
                    smallest: cur.bytes()?.to_vec(),
                    largest: cur.bytes()?.to_vec(),
                    created_at: cur.uvarint()?,
                    value_size: cur.uvarint()?,
                    ingest: cur.bool()?,
                };
                if edit_type == EditType::AddFile {
                    Edit::AddFile(file)
                } else {
                    Edit::DeleteFile(file)
                }
            }
            EditType::LogPointer => Edit::LogPointer {
                segment: cur.uvarint_u32()?,
                offset: cur.uvarint()?,
            },
            EditType::ValueLogHead | EditType::ValueLogDelete | EditType::ValueLogUpdate => {
                let meta = ValueLogMeta {
                    bucket: cur.uvarint_u32()?,
                    file_id: cur.uvarint_u32()?,
                    offset: cur.uvarint()?,
                    valid: cur.bool()?,
                };
                match edit_type {
                    EditType::ValueLogHead => Edit::ValueLogHead(meta),
                    EditType::ValueLogDelete => Edit::ValueLogDelete(meta),
                    _ => Edit::ValueLogUpdate(meta),
                }
            }
            EditType::RaftPointer => Edit::RaftPointer(RaftLogPointer {
                group_id: cur.uvarint()?,
                segment: cur.uvarint_u32()?,
                offset: cur.uvarint()?,
                applied_index: cur.uvarint()?,
                applied_term: cur.uvarint()?,
                committed: cur.uvarint()?,
                snapshot_index: cur.uvarint()?,
                snapshot_term: cur.uvarint()?,
                truncated_index: cur.uvarint()?,
                truncated_term: cur.uvarint()?,
                segment_index: cur.uvarint()?,
                truncated_offset: cur.uvarint()?,
            }),
            EditType::Region => {
                let delete = cur.bool()?;
                let id = cur.uvarint()?;
                let meta = if delete {
                    RegionMeta {
                        id,
                        ..Default::default()
                    }
                } else {
                    let start_key = cur.bytes()?.to_vec();
                    let end_key = cur.bytes()?.to_vec();
                    let epoch = RegionEpoch {
                        version: cur.uvarint()?,
                        conf_version: cur.uvarint()?,
                    };
                    let peer_count = cur.uvarint()?;
                    // Each peer takes at least two bytes.
                    if peer_count > (cur.remaining() / 2) as u64 {
                        return Err(Error::Truncated(format!("{peer_count} region peers")));
                    }
                    let mut peers = Vec::with_capacity(peer_count as usize);
                    for _ in 0..peer_count {
                        peers.push(Peer {
                            store_id: cur.uvarint()?,
                            peer_id: cur.uvarint()?,
                        });
                    }
                    let state = RegionState::from_u8(cur.u8()?)?;
                    RegionMeta {
                        id,
                        start_key,
                        end_key,
                        epoch,
                        peers,
                        state,
                    }
                };
                Edit::Region(RegionEdit { meta, delete })
            }
        };

        if cur.remaining() != 0 {
            return Err(Error::Corruption(format!(
                "{} trailing bytes after {edit_type:?} edit",
                cur.remaining()
            )));
        }
        Ok(edit)
    }
}
