use std::fs;
use std::sync::Arc;
use std::thread;

use ldpkit::{
    EndpointDirectory, EntityTag, GraphError, HandlerId, InMemoryStore, KernelConfig, KernelError,
    ResourceId, TemplateId, TemplateKind, TemplateManagementService, TransactionError,
    TransactionManager,
};
use tempfile::tempdir;
use time::OffsetDateTime;

const LIBRARY: &str = r#"
version: 1
roots: [Books]
handlers:
  - handler: Book
    kind: resource
    id: book
    attachments:
      - id: reviews
        path: reviews
        handler: Reviews
  - handler: Books
    kind: basic-container
    id: books
    member_handler: Book
  - handler: Reviews
    kind: basic-container
    id: reviews
    member_handler: Review
  - handler: Review
    kind: resource
    id: review
"#;

fn service() -> TemplateManagementService {
    KernelConfig::from_yaml_str(LIBRARY)
        .unwrap()
        .configure_service()
        .unwrap()
}

#[test]
fn books_scenario_resolves_member_template() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ldp.yaml");
    fs::write(&path, LIBRARY).unwrap();

    let service = KernelConfig::from_path(&path)
        .unwrap()
        .configure_service()
        .unwrap();
    let books = service
        .template_of_id(&TemplateId::new("books"))
        .unwrap()
        .unwrap();
    assert!(books.is_container());
    assert_eq!(books.member_template().unwrap().id().as_str(), "book");

    let review = service
        .template_of_handler(&HandlerId::new("Review"))
        .unwrap()
        .unwrap();
    assert_eq!(review.id().as_str(), "review");
    assert_eq!(service.library().unwrap().len(), 4);
}

#[test]
fn committed_graph_is_visible_to_later_transactions() {
    let service = service();
    let graph = service.resource_graph().unwrap();
    let manager = TransactionManager::new(Arc::new(InMemoryStore::new()));

    let (shelf, dune) = manager
        .run(|tx| {
            let shelf = graph
                .create_resource(tx, &TemplateId::new("books"), "shelf")?
                .id()
                .clone();
            let member = graph.add_member(tx, &shelf, "dune")?;
            let reviews = ResourceId::new("dune-reviews", "reviews");
            graph.attach(tx, member.member(), "reviews", &reviews, TemplateKind::Container)?;
            graph.add_member(tx, &reviews, "r1")?;
            Ok((shelf, member.member().clone()))
        })
        .unwrap();

    let mut tx = manager.transaction();
    tx.begin().unwrap();
    let container = graph.find_container(&tx, &shelf).unwrap().unwrap();
    assert_eq!(container.member_count(), 1);
    assert_eq!(container.member_by_number(0).unwrap().member(), &dune);

    let book = graph.find(&tx, &dune).unwrap().unwrap();
    assert_eq!(book.resource().parent(), Some(&shelf));
    let bound = book.resource().attachment("reviews").unwrap().resource().unwrap();
    let reviews = graph.find_container(&tx, bound).unwrap().unwrap();
    assert_eq!(reviews.member_count(), 1);
    tx.rollback().unwrap();
}

#[test]
fn failed_unit_of_work_is_rolled_back() {
    let service = service();
    let graph = service.resource_graph().unwrap();
    let store = InMemoryStore::new();
    let manager = TransactionManager::new(Arc::new(store.clone()));

    let err = manager
        .run(|tx| {
            let shelf = graph
                .create_resource(tx, &TemplateId::new("books"), "shelf")?
                .id()
                .clone();
            graph.add_member(tx, &shelf, "dune")?;
            graph.add_member(tx, &shelf, "dune")?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err.as_graph(), Some(GraphError::AlreadyMember { .. })));
    assert_eq!(store.revision(), 0);
    assert_eq!(store.snapshot().resource_count(), 0);
    assert!(!manager.has_active_transaction());
}

#[test]
fn concurrent_commits_conflict() {
    let service = service();
    let graph = service.resource_graph().unwrap();
    let manager = TransactionManager::new(Arc::new(InMemoryStore::new()));

    let mut first = manager.transaction();
    first.begin().unwrap();
    graph
        .create_resource(&mut first, &TemplateId::new("books"), "a")
        .unwrap();

    let other = manager.clone();
    let other_graph = graph.clone();
    thread::spawn(move || {
        other
            .run(|tx| {
                other_graph.create_resource(tx, &TemplateId::new("books"), "b")?;
                Ok(())
            })
            .unwrap();
    })
    .join()
    .unwrap();

    let err = first.commit().unwrap_err();
    assert!(matches!(
        err,
        KernelError::Transaction(TransactionError::Conflict { .. })
    ));
}

#[test]
fn endpoints_publish_graph_resources() {
    let service = service();
    let graph = service.resource_graph().unwrap();
    let manager = TransactionManager::new(Arc::new(InMemoryStore::new()));
    let directory = EndpointDirectory::new();
    let now = OffsetDateTime::UNIX_EPOCH;

    manager
        .run(|tx| {
            let shelf = graph
                .create_resource(tx, &TemplateId::new("books"), "shelf")?
                .id()
                .clone();
            let slug = graph.add_slug(tx, &shelf, "dune")?;
            let member = graph.add_member(tx, &shelf, "dune")?;
            let path = format!("/shelf/{}", slug.next_path());
            directory.create(tx, &path, member.member(), now, EntityTag::digest(b"dune"))?;
            Ok(())
        })
        .unwrap();

    let mut tx = manager.transaction();
    tx.begin().unwrap();
    let endpoint = directory
        .find_by_path(&tx, "/shelf/dune")
        .unwrap()
        .unwrap();
    assert_eq!(endpoint.resource(), Some(&ResourceId::new("dune", "book")));
    assert!(!endpoint.entity_tag().is_weak());
}
