use fibre_memcore::CacheBuilder;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() {
  let cache = CacheBuilder::default()
    .name("async-demo")
    .persistence_dir("memcore-demo")
    .build_async()
    .expect("Failed to build cache");
  let loads = Arc::new(AtomicUsize::new(0));

  // Ten tasks ask for the same key at once; the factory runs once.
  let mut tasks = Vec::new();
  for i in 0..10 {
    let cache = cache.clone();
    let loads = loads.clone();
    tasks.push(tokio::spawn(async move {
      let value = cache
        .get_or_add("report", Duration::from_secs(60), || async move {
          loads.fetch_add(1, Ordering::SeqCst);
          sleep(Duration::from_millis(200)).await;
          Some(format!("report built for task {i}"))
        })
        .await
        .expect("get_or_add failed");
      println!("task {i} got {:?}", value);
    }));
  }
  for task in tasks {
    task.await.expect("task panicked");
  }

  println!("\nFactory ran {} time(s).", loads.load(Ordering::SeqCst));
  println!("Cache metrics: {:#?}", cache.metrics());
}
