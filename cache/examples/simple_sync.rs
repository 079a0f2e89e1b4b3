use fibre_memcore::{CacheBuilder, CacheExt, EntryOptions, Expiration};
use std::thread;
use std::time::Duration;

fn main() {
  // A cache whose persistent entries go to ./memcore-demo/demo.json and which
  // sweeps expired entries every second.
  let cache = CacheBuilder::default()
    .name("demo")
    .persistence_dir("memcore-demo")
    .sweep_interval(Duration::from_secs(1))
    .build()
    .expect("Failed to build cache");

  println!("Adding 'greeting' for 2 seconds and a persistent, tagged 'user:1'.");
  cache
    .add("greeting", "hello".to_string(), Duration::from_secs(2))
    .expect("add failed");
  cache
    .add_with(
      "user:1",
      "alice".to_string(),
      Expiration::sliding(Duration::from_secs(30)),
      EntryOptions::new().tag("users").persist(true),
    )
    .expect("add failed");

  match cache.get::<String>("greeting").expect("read failed") {
    Some(value) => println!("Found greeting: {}", value),
    None => println!("Greeting not found."),
  }

  let computed = cache
    .get_or_add("answer", Duration::from_secs(60), || {
      println!("Computing the answer...");
      Some(42i64)
    })
    .expect("get_or_add failed");
  println!("Answer: {:?}", computed);

  println!("\nWaiting 3 seconds for 'greeting' to expire...");
  thread::sleep(Duration::from_secs(3));
  println!("Keys now: {:?}", cache.keys());

  let removed = cache.remove_tags(["users"]);
  println!("Removed {} entries tagged 'users'.", removed);

  println!("\nCache metrics: {:#?}", cache.metrics());
}
