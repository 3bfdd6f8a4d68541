use feti_prep::{
    progress::{closure_sink, ProgressMsg},
    FetiPreprocessor, GridStrip, Params, PreprocessOutput,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Two clusters of four square subdomains with 13 x 13 nodes and 2 DOFs per node.
    // Neighbours share 26 interface rows, above the default adjacency threshold.
    let strip = GridStrip::new(13, 2).clusters(2).subdomains_per_cluster(4);

    // Print coupling events as they arrive
    let (sink, listener) = closure_sink(256, |msg| match msg {
        ProgressMsg::ClusterAssembled {
            cluster,
            coupled_pairs,
            total_rows,
        } => println!("cluster {cluster}: {coupled_pairs} coupled pairs, {total_rows} B0 rows"),
        ProgressMsg::Warning(warning) => println!("warning: {warning}"),
        ProgressMsg::Message { message } => println!("{message}"),
        _ => {}
    });

    // Run on four worker threads
    let params = Params::builder().multiprocessing(true).num_workers(4).build();
    let preprocessor = FetiPreprocessor::builder()
        .params(params)
        .progress_callback(sink)
        .build()?;

    // Load the subdomains and run both stages
    let store = preprocessor.load_store(&strip, &strip.layout())?;
    let output = preprocessor.run(&store)?;

    // Persist the outputs next to the system temp files
    let path = std::env::temp_dir().join("grid_strip_feti_prep.json");
    output.save_json(&path)?;
    let reloaded = PreprocessOutput::load_json(&path)?;
    println!(
        "saved {} clusters of kernel constraints to {}",
        reloaded.kernel_b0.len(),
        path.display()
    );

    // Dropping the last sink handle lets the listener finish
    drop(preprocessor);
    let _ = listener.join();

    Ok(())
}
