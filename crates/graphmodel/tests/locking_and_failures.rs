mod common;

use common::{Document, Folder, Invoice, Owner, file_into, id_of, metadata, session, unfile};
use graphmodel::prelude::*;
use graphmodel::{DriverError, DriverErrorKind, MappingErrorKind, WriteTarget};
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::thread;

#[test]
fn concurrent_session_update_is_a_version_conflict() {
    let store = MemoryStore::new();
    let mut first = Session::new(MemoryDriver::new(store.clone()), metadata());
    let mut second = Session::new(MemoryDriver::new(store.clone()), metadata());

    let mine = Folder::create("inbox");
    first.save(&mine).unwrap();
    let id = id_of(&mine);

    // another session loads the same node and saves a change first
    let theirs = second
        .attach(EntityRef::new(Folder {
            id: Some(id),
            version: Some(0),
            name: "inbox".to_string(),
            documents: Vec::new(),
        }))
        .unwrap();
    theirs.with_mut::<Folder, _>(|f| f.name = "theirs".to_string());
    second.save(&theirs).unwrap();
    assert_eq!(theirs.get("version"), Value::Integer(1));

    mine.with_mut::<Folder, _>(|f| f.name = "mine".to_string());
    let err = first.save(&mine).unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.entity_id(), Some(id));
    match &err {
        Error::OptimisticLock(e) => {
            assert_eq!(e.target, WriteTarget::Node);
            assert_eq!(e.expected_version, Some(0));
            assert_eq!(e.actual_version, Some(1));
        }
        other => panic!("expected optimistic lock error, got {other:?}"),
    }

    // nothing was written back
    assert_eq!(mine.get("version"), Value::Integer(0));
    assert!(first.is_dirty(&mine).unwrap());
    assert_eq!(
        store.node(id).unwrap().properties["name"],
        Value::from("theirs")
    );
}

#[test]
fn sessions_on_separate_threads_keep_every_write() {
    let store = MemoryStore::new();
    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let store = store.clone();
            thread::spawn(move || {
                let mut session = Session::new(MemoryDriver::new(store), metadata());
                (0..200)
                    .map(|n| {
                        let folder = Folder::create(&format!("folder-{worker}-{n}"));
                        session.save(&folder).unwrap();
                        id_of(&folder)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let ids: BTreeSet<i64> = workers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();
    assert_eq!(ids.len(), 800);
    assert_eq!(store.node_count(), 800);
}

#[test]
fn externally_deleted_node_is_not_found() {
    let (mut session, store) = session();
    let doc = Document::create("a");
    session.save(&doc).unwrap();
    let id = id_of(&doc);
    assert!(store.delete_node(id));

    doc.with_mut::<Document, _>(|d| d.name = "b".to_string());
    let err = session.save(&doc).unwrap_err();
    assert!(err.is_not_found());
    assert!(!err.is_conflict());
    assert_eq!(err.entity_id(), Some(id));
}

#[test]
fn versioned_delete_of_missing_node_is_not_found() {
    let (mut session, store) = session();
    let f = Folder::create("inbox");
    session.save(&f).unwrap();
    store.delete_node(id_of(&f));

    let err = session.delete(&f).unwrap_err();
    assert!(err.is_not_found());
    assert!(session.get_node(id_of(&f)).is_some());
}

#[test]
fn driver_failure_leaves_session_untouched() {
    let (mut session, store) = session();
    let f = Folder::create("inbox");
    let a = Document::create("a");
    file_into(&f, &a);

    session
        .driver_mut()
        .fail_next(DriverError::new(DriverErrorKind::Transport, "connection reset"));
    let err = session.save(&f).unwrap_err();
    assert!(err.is_driver());
    assert!(f.get("id").is_null());
    assert!(a.get("id").is_null());
    assert!(session.context().is_empty());
    assert_eq!(store.node_count(), 0);

    // the same graph saves cleanly once the driver recovers
    let result = session.save(&f).unwrap();
    assert_eq!(result.nodes_created, 2);
    assert_eq!(store.relationship_count(), 1);
    unfile(&f);
}

#[test]
fn converter_rejection_fails_before_any_statement() {
    let (mut session, store) = session();
    let bad = EntityRef::new(Invoice {
        number: "INV-1".to_string(),
        amount: "twelve".to_string(),
        ..Invoice::default()
    });
    let err = session.save(&bad).unwrap_err();
    assert!(err.is_compilation());
    assert!(matches!(err, Error::Conversion(_)));
    assert!(session.driver().history().is_empty());
    assert_eq!(store.node_count(), 0);

    let good = EntityRef::new(Invoice {
        number: "INV-2".to_string(),
        amount: "12.50".to_string(),
        issued: Some(0),
        ..Invoice::default()
    });
    session.save(&good).unwrap();
    let stored = store.node(id_of(&good)).unwrap();
    assert_eq!(stored.properties["amount"], Value::from("12.50"));
    assert_eq!(stored.properties["issued"], Value::from("1970-01-01"));
}

#[test]
fn unresolvable_relationship_target_is_a_mapping_error() {
    let (mut session, store) = session();
    let owner = EntityRef::new(Owner {
        name: "ann".to_string(),
        ..Owner::default()
    });
    match session.save(&owner).unwrap_err() {
        Error::Mapping(e) => {
            assert_eq!(e.kind, MappingErrorKind::UnresolvableTarget);
            assert_eq!(e.field.as_deref(), Some("pets"));
        }
        other => panic!("expected mapping error, got {other:?}"),
    }
    assert_eq!(store.node_count(), 0);
}

#[test]
fn pre_save_veto_aborts_the_whole_batch() {
    let (mut session, store) = session();
    session.on_pre_save(|entity| {
        if entity.get("name") == Value::from("secret") {
            return Err(Error::Custom("refusing to save secret".to_string()));
        }
        Ok(())
    });
    let f = Folder::create("inbox");
    let a = Document::create("secret");
    file_into(&f, &a);

    let err = session.save(&f).unwrap_err();
    assert_eq!(err.to_string(), "refusing to save secret");
    assert_eq!(store.node_count(), 0);
    assert!(session.driver().history().is_empty());
    unfile(&f);
}

#[test]
fn lifecycle_events_see_each_entity_once() {
    let (mut session, _store) = session();
    let saved = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&saved);
    session.on_post_save(move |entity| {
        log.lock().unwrap().push(entity.entity_type());
        Ok(())
    });
    let deleted = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&deleted);
    session.on_pre_delete(move |entity| {
        log.lock().unwrap().push(entity.get("name"));
        Ok(())
    });

    let f = Folder::create("inbox");
    let a = Document::create("a");
    let b = Document::create("b");
    file_into(&f, &a);
    file_into(&f, &b);
    session.save(&f).unwrap();
    assert_eq!(*saved.lock().unwrap(), vec!["Folder", "Document", "Document"]);

    session.delete(&b).unwrap();
    assert_eq!(*deleted.lock().unwrap(), vec![Value::from("b")]);
    unfile(&f);
}
