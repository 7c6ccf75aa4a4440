use num_format::{Locale, ToFormattedString};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SLIDING_WINDOW_SIZE: u64 = 2; // In seconds
const BATCH_SIZE: u64 = 1000;

static STOP: AtomicBool = AtomicBool::new(false);

#[repr(C)]
#[derive(Default)]
struct WorkerStats {
    count: AtomicU64,
    /// Padding to avoid false sharing
    padding: [u64; 15],
}

/// Runs `func` in a tight loop on every physical core but one and prints the
/// number of calls per second until Ctrl-C is pressed.
pub fn test_throughput<F>(func: F)
where
    F: Fn() + Sync + Send + 'static,
{
    ctrlc::set_handler(move || {
        STOP.store(true, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let num_threads = num_cpus::get_physical().max(2);
    println!("Number of threads: {}", num_threads);
    let func = Arc::new(func);
    let stats: Arc<Vec<WorkerStats>> = Arc::new(
        (0..num_threads - 1)
            .map(|_| WorkerStats::default())
            .collect(),
    );

    let mut handles = Vec::with_capacity(num_threads);
    let monitor_stats = Arc::clone(&stats);
    handles.push(thread::spawn(move || {
        let mut window_start = Instant::now();
        let mut previous_total: u64 = 0;
        while !STOP.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(500));
            let elapsed = window_start.elapsed();
            if elapsed.as_secs() < SLIDING_WINDOW_SIZE {
                continue;
            }
            let total: u64 = monitor_stats
                .iter()
                .map(|worker| worker.count.load(Ordering::Relaxed))
                .sum();
            let throughput = ((total - previous_total) as f64 / elapsed.as_secs_f64()) as u64;
            println!(
                "Throughput: {} iterations/sec",
                throughput.to_formatted_string(&Locale::en)
            );
            previous_total = total;
            window_start = Instant::now();
        }
    }));

    for worker in 0..num_threads - 1 {
        let stats = Arc::clone(&stats);
        let func = Arc::clone(&func);
        handles.push(thread::spawn(move || {
            while !STOP.load(Ordering::SeqCst) {
                for _ in 0..BATCH_SIZE {
                    func();
                }
                stats[worker].count.fetch_add(BATCH_SIZE, Ordering::Relaxed);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}
