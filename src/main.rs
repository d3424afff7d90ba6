use arbor::{
    Arbor,
    base::NodeDraft,
    config::ArborConfig,
    store::InMemoryRangeStore,
    tree::{Listing, Placement},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let arbor = Arbor::init(InMemoryRangeStore::new(), ArborConfig::default()).await;

    let root = arbor
        .insert_root(NodeDraft::new("catalog"), None)
        .await
        .unwrap();
    let books = arbor
        .insert(NodeDraft::new("books"), root.id(), Placement::LastChild)
        .await
        .unwrap();
    let music = arbor
        .insert(NodeDraft::new("music"), root.id(), Placement::LastChild)
        .await
        .unwrap();
    let fiction = arbor
        .insert(NodeDraft::new("fiction"), books.id(), Placement::FirstChild)
        .await
        .unwrap();
    arbor
        .insert(NodeDraft::new("poetry"), fiction.id(), Placement::NextSibling)
        .await
        .unwrap();
    arbor
        .insert(NodeDraft::new("jazz"), music.id(), Placement::LastChild)
        .await
        .unwrap();

    arbor
        .move_node(fiction.id(), music.id(), Placement::PrevSibling)
        .await
        .unwrap();
    arbor.verify(root.scope()).await.unwrap();

    for (node, depth) in arbor.outline(root.scope(), None).await.unwrap() {
        println!(
            "{}{} ({}, {})",
            "  ".repeat(depth as usize),
            String::from_utf8_lossy(node.payload()),
            node.left(),
            node.right(),
        );
    }

    let root = arbor.node(root.id()).await.unwrap();
    let leaves = arbor.leaves(&root, false, Listing::new()).await.unwrap();
    println!("{} leaves, {} nodes below the root", leaves.len(), root.descendant_count());
}
