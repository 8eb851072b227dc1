// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-process [`ObjectStore`] used by tests and single-host runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::{
    group_member_key, MetaValue, ObjectId, ObjectMeta, ObjectStore, StoreError,
    GROUP_FRAGMENTS_ENTRY,
};

#[derive(Debug)]
struct StoredObject {
    payload: Bytes,
    digest: [u8; 32],
    meta: ObjectMeta,
    persisted: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    objects: HashMap<u64, StoredObject>,
    names: HashMap<String, u64>,
}

/// Shared in-memory object store.
///
/// Payload digests (blake3) are checked on every read; ids are assigned
/// from a process-local counter starting at 1.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ObjectStore for MemoryStore {
    fn put(&self, payload: Bytes, meta: ObjectMeta) -> Result<ObjectId, StoreError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let digest = *blake3::hash(&payload).as_bytes();
        inner.objects.insert(
            id,
            StoredObject {
                payload,
                digest,
                meta,
                persisted: false,
            },
        );
        Ok(ObjectId(id))
    }

    fn get(&self, id: ObjectId) -> Result<Option<Bytes>, StoreError> {
        let inner = self.lock();
        match inner.objects.get(&id.0) {
            None => Ok(None),
            Some(obj) => {
                if *blake3::hash(&obj.payload).as_bytes() != obj.digest {
                    return Err(StoreError::Corrupt(id));
                }
                Ok(Some(obj.payload.clone()))
            }
        }
    }

    fn get_meta(&self, id: ObjectId) -> Result<Option<ObjectMeta>, StoreError> {
        Ok(self.lock().objects.get(&id.0).map(|obj| obj.meta.clone()))
    }

    fn exists(&self, id: ObjectId) -> Result<bool, StoreError> {
        Ok(self.lock().objects.contains_key(&id.0))
    }

    fn del_data(&self, ids: &[ObjectId]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for id in ids {
            inner.objects.remove(&id.0);
        }
        Ok(())
    }

    fn persist(&self, id: ObjectId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.objects.get_mut(&id.0) {
            None => Err(StoreError::NotFound(id)),
            Some(obj) => {
                obj.persisted = true;
                Ok(())
            }
        }
    }

    fn put_name(&self, id: ObjectId, name: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.objects.contains_key(&id.0) {
            return Err(StoreError::NotFound(id));
        }
        if inner.names.contains_key(name) {
            return Err(StoreError::DuplicateName(name.to_owned()));
        }
        inner.names.insert(name.to_owned(), id.0);
        Ok(())
    }

    fn get_name(&self, name: &str) -> Result<Option<ObjectId>, StoreError> {
        Ok(self.lock().names.get(name).copied().map(ObjectId))
    }

    fn construct_group(
        &self,
        type_name: &str,
        members: BTreeMap<u32, ObjectId>,
    ) -> Result<ObjectId, StoreError> {
        let mut meta = ObjectMeta::new(type_name).with_entry(
            GROUP_FRAGMENTS_ENTRY,
            MetaValue::U64(members.len() as u64),
        );
        {
            let inner = self.lock();
            for (fid, id) in &members {
                if !inner.objects.contains_key(&id.0) {
                    return Err(StoreError::MissingMember {
                        key: group_member_key(*fid),
                        id: *id,
                    });
                }
            }
        }
        for (fid, id) in members {
            meta = meta.with_member(group_member_key(fid), id);
        }
        let id = self.put(Bytes::new(), meta)?;
        self.persist(id)?;
        Ok(id)
    }
}
