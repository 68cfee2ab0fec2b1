
use graphcall::bubble_tree;
use graphcall::cli::{Settings, check_settings, get_raw_settings};
use graphcall::data_types::alignment::Alignment;
use graphcall::data_types::graph::VariationGraph;
use graphcall::data_types::locus::{Locus, Site};
use graphcall::genotyper::{GenotyperConfig, solve_site};
use graphcall::graph_io;
use graphcall::reference_index::ReferenceIndex;
use graphcall::site_finder;
use graphcall::writers::OrderedBuffer;
use graphcall::writers::locus_writer::{LocusFormat, LocusWriter};
use graphcall::writers::vcf_writer::VcfWriter;

use log::{LevelFilter, debug, error, info};
use rustc_hash::FxHashMap as HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Instant;
use threadpool::ThreadPool;

/// The active output sink: VCF records need the graph and reference index,
/// locus streams do not.
enum OutputWriter {
    Vcf(VcfWriter<Box<dyn Write>>, ReferenceIndex),
    Locus(LocusWriter<Box<dyn Write>>)
}

fn main() {
    // get the settings
    let settings: Settings = get_raw_settings();
    let filter_level: LevelFilter = match settings.verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace
    };

    // immediately setup logging first
    env_logger::builder()
        .format_timestamp_millis()
        .filter_level(filter_level)
        .init();

    // okay, now we can check all the other settings
    let cli_settings: Settings = check_settings(settings);

    // load the graph, then resolve the reference path name before any read
    // paths get embedded next to it
    let mut graph = match graph_io::load_graph(&cli_settings.graph_filename) {
        Ok(g) => g,
        Err(e) => {
            error!("Error during graph loading: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    };
    let ref_path_name: String = match cli_settings.ref_path_name.clone() {
        Some(name) => name,
        None => {
            if graph.path_count() == 1 {
                // autodetect the reference as the only embedded path
                graph.path_name(0).to_string()
            } else {
                "ref".to_string()
            }
        }
    };
    if cli_settings.output_vcf {
        info!("Calling against path {:?}", ref_path_name);
    }

    let alignments: Vec<Alignment> = match graph_io::load_alignments(&cli_settings.alignment_filename, &mut graph) {
        Ok(a) => a,
        Err(e) => {
            error!("Error during alignment loading: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    };
    let mut reads_by_name: HashMap<String, Alignment> = Default::default();
    for alignment in alignments.into_iter() {
        reads_by_name.insert(alignment.name.clone(), alignment);
    }
    let ref_path_index: Option<usize> = graph.path_index(&ref_path_name);

    // partition the graph into candidate sites
    let site_result = if cli_settings.use_cactus {
        bubble_tree::find_sites_with_bubble_tree(&graph, &ref_path_name)
    } else {
        site_finder::find_sites(&graph, cli_settings.unfold_max_length, cli_settings.dagify_steps)
    };
    let sites: Vec<Site> = match site_result {
        Ok(s) => s,
        Err(e) => {
            error!("Error during site finding: {}", e);
            std::process::exit(exitcode::DATAERR);
        }
    };
    info!("Found {} candidate sites", sites.len());

    // set up the output sink
    let out_stream: Box<dyn Write> = match cli_settings.output_filename {
        Some(ref filename) => {
            match File::create(filename) {
                Ok(f) => Box::new(BufWriter::new(f)),
                Err(e) => {
                    error!("Error while creating output file {:?}: {}", filename, e);
                    std::process::exit(exitcode::IOERR);
                }
            }
        },
        None => Box::new(BufWriter::new(std::io::stdout()))
    };
    let mut output_writer: OutputWriter = if cli_settings.output_vcf {
        let reference_index = match ReferenceIndex::new(&graph, &ref_path_name) {
            Ok(ri) => ri,
            Err(e) => {
                error!("Error during reference indexing: {}", e);
                std::process::exit(exitcode::DATAERR);
            }
        };
        let vcf_writer = match VcfWriter::new(
            out_stream,
            &reference_index,
            &cli_settings.sample_name,
            cli_settings.contig_name.as_deref(),
            cli_settings.variant_offset
        ) {
            Ok(vw) => vw,
            Err(e) => {
                error!("Error during VCF writer creation: {}", e);
                std::process::exit(exitcode::IOERR);
            }
        };
        OutputWriter::Vcf(vcf_writer, reference_index)
    } else {
        let format = if cli_settings.output_json { LocusFormat::Json } else { LocusFormat::Framed };
        OutputWriter::Locus(LocusWriter::new(out_stream, format))
    };

    let config: GenotyperConfig = GenotyperConfig {
        max_path_search_steps: cli_settings.max_path_search_steps,
        min_recurrence: cli_settings.min_recurrence,
        het_prior: cli_settings.het_prior,
        default_base_quality: cli_settings.default_base_quality,
        use_mapq: cli_settings.use_mapq,
        realign: cli_settings.realign
    };

    // process the sites, in parallel when asked
    let start_time: Instant = Instant::now();
    let total_affinities: Arc<AtomicU64> = Arc::new(AtomicU64::new(0));
    let arc_graph = Arc::new(graph);
    let arc_reads = Arc::new(reads_by_name);
    let mut ordered_results: OrderedBuffer<Option<Locus>> = OrderedBuffer::new();
    let mut emitted_loci: u64 = 0;

    const UPDATE_SPEED: u64 = 1000;
    let mut results_received: u64 = 0;

    if cli_settings.threads <= 1 {
        for (site_index, site) in sites.iter().enumerate() {
            let result: Option<Locus> = match solve_site(
                &arc_graph, &arc_reads, site.clone(), ref_path_index, &config, &total_affinities
            ) {
                Ok(r) => r,
                Err(e) => {
                    // one broken site must not lose the rest of the run
                    error!("Error while processing site {}..{}: {}", site.start, site.end, e);
                    None
                }
            };
            results_received += 1;
            ordered_results.insert(site_index, result);
            emitted_loci += drain_results(&mut ordered_results, &mut output_writer, &arc_graph);

            if results_received % UPDATE_SPEED == 0 {
                let sites_per_sec: f64 = results_received as f64 / start_time.elapsed().as_secs_f64();
                info!("Processed {} sites: {:.4} sites/sec", results_received, sites_per_sec);
            }
        }
    } else {
        info!("Starting job pool with {} threads...", cli_settings.threads);
        let job_slots: u64 = 40 * cli_settings.threads as u64;
        let mut jobs_queued: u64 = 0;

        let pool = ThreadPool::new(cli_settings.threads);
        let (tx, rx) = mpsc::channel();

        for (site_index, site) in sites.iter().enumerate() {
            // make sure no panics encountered so far
            if pool.panic_count() > 0 {
                error!("Panic detected in ThreadPool, check above for details.");
                std::process::exit(exitcode::SOFTWARE);
            }

            if jobs_queued - results_received >= job_slots {
                let (received_index, result): (usize, Option<Locus>) = rx.recv().unwrap();
                results_received += 1;
                ordered_results.insert(received_index, result);
                emitted_loci += drain_results(&mut ordered_results, &mut output_writer, &arc_graph);

                if results_received % UPDATE_SPEED == 0 {
                    let sites_per_sec: f64 = results_received as f64 / start_time.elapsed().as_secs_f64();
                    info!(
                        "Processed {} sites: {:.4} sites/sec, writer waiting on site {}",
                        results_received, sites_per_sec, ordered_results.waiting_on()
                    );
                }
            }

            let tx = tx.clone();
            let arc_graph = arc_graph.clone();
            let arc_reads = arc_reads.clone();
            let config = config.clone();
            let total_affinities = total_affinities.clone();
            let site = site.clone();
            pool.execute(move || {
                let result: Option<Locus> = match solve_site(
                    &arc_graph, &arc_reads, site.clone(), ref_path_index, &config, &total_affinities
                ) {
                    Ok(r) => r,
                    Err(e) => {
                        error!("Error while processing site {}..{}: {}", site.start, site.end, e);
                        None
                    }
                };
                tx.send((site_index, result)).expect("channel will be there waiting for the pool");
            });
            jobs_queued += 1;
        }

        while results_received < jobs_queued {
            if pool.panic_count() > 0 {
                error!("Panic detected in ThreadPool, check above for details.");
                std::process::exit(exitcode::SOFTWARE);
            }

            let (received_index, result): (usize, Option<Locus>) = rx.recv().unwrap();
            results_received += 1;
            ordered_results.insert(received_index, result);
            emitted_loci += drain_results(&mut ordered_results, &mut output_writer, &arc_graph);

            if results_received % UPDATE_SPEED == 0 || (jobs_queued - results_received) < cli_settings.threads as u64 {
                let sites_per_sec: f64 = results_received as f64 / start_time.elapsed().as_secs_f64();
                info!(
                    "Processed {} / {} sites: {:.4} sites/sec, writer waiting on site {}",
                    results_received, jobs_queued, sites_per_sec, ordered_results.waiting_on()
                );
            }
        }
    }

    // everything was inserted, so the buffer must have fully drained
    assert!(ordered_results.is_empty());

    match &mut output_writer {
        OutputWriter::Vcf(vcf_writer, _) => {
            if let Err(e) = vcf_writer.flush() {
                error!("Error while finalizing output: {}", e);
                std::process::exit(exitcode::IOERR);
            }
        },
        OutputWriter::Locus(locus_writer) => {
            if let Err(e) = locus_writer.flush() {
                error!("Error while finalizing output: {}", e);
                std::process::exit(exitcode::IOERR);
            }
        }
    }

    info!("Computed {} affinities", total_affinities.load(Ordering::Relaxed));
    info!(
        "Emitted {} loci from {} sites after {} seconds.",
        emitted_loci, sites.len(), start_time.elapsed().as_secs_f64()
    );
}

/// Drains every in-order result from the reorder buffer into the writer,
/// returning how many loci were written. Sites that produced no locus are
/// skipped silently; writer failures are fatal.
fn drain_results(
    ordered_results: &mut OrderedBuffer<Option<Locus>>,
    output_writer: &mut OutputWriter,
    graph: &VariationGraph
) -> u64 {
    let mut written: u64 = 0;
    while let Some(result) = ordered_results.pop_ready() {
        let locus = match result {
            Some(locus) => locus,
            None => {
                debug!("Site produced no locus, nothing to write");
                continue;
            }
        };
        let write_result = match output_writer {
            OutputWriter::Vcf(vcf_writer, reference_index) => {
                vcf_writer.write_locus(graph, reference_index, &locus)
            },
            OutputWriter::Locus(locus_writer) => locus_writer.write_locus(&locus)
        };
        match write_result {
            Ok(()) => {
                written += 1;
            },
            Err(e) => {
                error!("Error while writing locus: {}", e);
                std::process::exit(exitcode::IOERR);
            }
        }
    }
    written
}
