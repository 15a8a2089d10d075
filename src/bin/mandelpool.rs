use clap::{App, Arg, ArgMatches};
use image::pnm::PNMEncoder;
use image::pnm::{PNMSubtype, SampleEncoding};
use image::ColorType;
use log::info;
use num::clamp;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mandelpool::{
    BatchRequest, Config, EscapeTimeKernel, Rect, RenderMode, Resolution, Scheduler,
    ThreadSpawner, ViewParams,
};

fn parse_pair<T>(s: &str, separator: char) -> Option<(T, T)>
where
    T: FromStr,
{
    match s.find(separator) {
        None => None,
        Some(index) => match (T::from_str(&s[..index]), T::from_str(&s[index + 1..])) {
            (Ok(l), Ok(r)) => Some((l, r)),
            _ => None,
        },
    }
}

fn validate_pair<T: FromStr>(s: &str, separator: char, err: &str) -> Result<(), String> {
    match parse_pair::<T>(s, separator) {
        Some(_) => Ok(()),
        None => Err(err.to_string()),
    }
}

fn validate_range<T: FromStr + Ord>(
    s: &str,
    low: T,
    high: T,
    isnotanumber_err: &str,
    isnotinrange_err: &str,
) -> Result<(), String> {
    match T::from_str(s) {
        Ok(i) => {
            if i >= low && i <= high {
                Ok(())
            } else {
                Err(isnotinrange_err.to_string())
            }
        }
        Err(_) => Err(isnotanumber_err.to_string()),
    }
}

// Coordinates stay strings until ViewParams parses them exactly.
fn validate_center(s: &str) -> Result<(), String> {
    match s.find(',') {
        Some(idx) => mandelpool::params::parse_decimal(&s[..idx])
            .and_then(|_| mandelpool::params::parse_decimal(&s[idx + 1..]))
            .map(|_| ())
            .map_err(|e| e.to_string()),
        None => Err("Could not parse center; expected re,im".to_string()),
    }
}

const OUTPUT: &str = "output";
const SIZE: &str = "size";
const CENTER: &str = "center";
const RADIUS: &str = "radius";
const THREADS: &str = "threads";
const ITERATIONS: &str = "iterations";
const TILE: &str = "tile";
const MODE: &str = "mode";

fn args<'a>() -> ArgMatches<'a> {
    let max_threads = num_cpus::get();

    App::new("mandelpool")
        .version("0.1.0")
        .author("Elf M. Sternberg <elf.sternberg@gmail.com>")
        .about("Tiled, multithreaded Mandelbrot renderer")
        .arg(
            Arg::with_name(OUTPUT)
                .required(true)
                .long(OUTPUT)
                .short("o")
                .takes_value(true)
                .help("Output file"),
        )
        .arg(
            Arg::with_name(SIZE)
                .required(false)
                .long(SIZE)
                .short("s")
                .takes_value(true)
                .default_value("800x600")
                .validator(|s| validate_pair::<u16>(&s, 'x', "Could not parse output image size"))
                .help("Size of output image"),
        )
        .arg(
            Arg::with_name(CENTER)
                .required(false)
                .long(CENTER)
                .short("c")
                .takes_value(true)
                .allow_hyphen_values(true)
                .default_value("-0.75,0")
                .validator(|s| validate_center(&s))
                .help("Center of the view on the complex plane"),
        )
        .arg(
            Arg::with_name(RADIUS)
                .required(false)
                .long(RADIUS)
                .short("r")
                .takes_value(true)
                .default_value("1.5")
                .validator(|s| {
                    mandelpool::params::parse_decimal(&s)
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                })
                .help("Distance from the center to the nearest edge of the image"),
        )
        .arg(
            Arg::with_name(THREADS)
                .required(false)
                .long(THREADS)
                .short("t")
                .takes_value(true)
                .validator(move |s| {
                    validate_range(
                        &s,
                        1,
                        max_threads,
                        "Could not parse thread count",
                        &format!("Thread count must be between 1 and {}", max_threads),
                    )
                })
                .help("Number of tile workers [default: one per core]"),
        )
        .arg(
            Arg::with_name(ITERATIONS)
                .required(false)
                .long(ITERATIONS)
                .short("i")
                .takes_value(true)
                .default_value("1000")
                .validator(move |s| {
                    validate_range(
                        &s,
                        1,
                        1_000_000,
                        "Could not parse iteration count",
                        "Iteration count must be between 1 and 1000000",
                    )
                })
                .help("Iteration limit per pixel"),
        )
        .arg(
            Arg::with_name(TILE)
                .required(false)
                .long(TILE)
                .takes_value(true)
                .default_value("128")
                .validator(move |s| {
                    validate_range(
                        &s,
                        8,
                        4096,
                        "Could not parse tile size",
                        "Tile size must be between 8 and 4096",
                    )
                })
                .help("Edge length of a tile, in pixels"),
        )
        .arg(
            Arg::with_name(MODE)
                .required(false)
                .long(MODE)
                .short("m")
                .takes_value(true)
                .possible_values(&["normal", "perturbation"])
                .default_value("normal")
                .help("Render mode"),
        )
        .get_matches()
}

fn write_image(outfile: &str, pixels: &[u8], bounds: Resolution) -> Result<(), std::io::Error> {
    let path = Path::new(outfile);
    let output = File::create(&path)?;
    let mut encoder =
        PNMEncoder::new(output).with_subtype(PNMSubtype::Graymap(SampleEncoding::Binary));
    encoder.encode(pixels, bounds.width, bounds.height, ColorType::Gray(8))?;
    Ok(())
}

// Points that never escape are black; everything else brightens with
// the time it took to escape.
fn shade(count: u32, limit: u32) -> u8 {
    if count >= limit {
        return 0;
    }
    clamp((u64::from(count) * 255) / u64::from(limit.max(1)), 0, 255) as u8
}

fn assemble(scheduler: &Scheduler, canvas: Resolution, limit: u32) -> Vec<u8> {
    let mut pixels = vec![0u8; canvas.area() as usize];
    for entry in scheduler.tile_cache().entries() {
        let rect = entry.rect;
        for row in 0..rect.height {
            for column in 0..rect.width {
                let (x, y) = (rect.x + column as i32, rect.y + row as i32);
                if x < 0 || y < 0 || x as u32 >= canvas.width || y as u32 >= canvas.height {
                    continue;
                }
                if let Some(count) = entry.iteration_at(f64::from(x), f64::from(y)) {
                    pixels[y as usize * canvas.width as usize + x as usize] = shade(count, limit);
                }
            }
        }
    }
    pixels
}

fn render(matches: &ArgMatches) -> Result<(), String> {
    // Every value below was checked by its validator.
    let value = |name: &str| matches.value_of(name).unwrap_or_default().to_string();

    let (width, height) =
        parse_pair::<u16>(&value(SIZE), 'x').ok_or("Error parsing image dimensions")?;
    let canvas = Resolution::new(u32::from(width), u32::from(height));
    let center = value(CENTER);
    let (re, im) = center.split_at(center.find(',').ok_or("Error parsing center")?);
    let iterations = u32::from_str(&value(ITERATIONS)).map_err(|e| e.to_string())?;
    let threads = match matches.value_of(THREADS) {
        Some(threads) => usize::from_str(threads).map_err(|e| e.to_string())?,
        None => num_cpus::get(),
    };
    let tile = u32::from_str(&value(TILE)).map_err(|e| e.to_string())?;
    let mode = RenderMode::from_str(&value(MODE))?;

    let params = ViewParams::parse(re, &im[1..], &value(RADIUS), iterations, mode)
        .map_err(|e| e.to_string())?;

    let config = Config {
        worker_count: threads,
        mode,
        ..Config::default()
    };
    let spawner = ThreadSpawner::new(Arc::new(EscapeTimeKernel::new()));
    let mut scheduler = Scheduler::new(config, Box::new(spawner)).map_err(|e| e.to_string())?;

    let batch = scheduler.next_batch_id();
    scheduler.start_batch(batch);
    scheduler.register_batch(
        batch,
        BatchRequest::new(params, canvas, Rect::grid(canvas, tile), move |outcome| {
            info!("{}: {:?}", batch, outcome)
        }),
    );

    let mut last_report = Instant::now();
    while scheduler.has_live_batch() {
        scheduler.poll(Duration::from_millis(50));
        if last_report.elapsed() >= Duration::from_secs(1) {
            info!("{}", scheduler.progress_string());
            last_report = Instant::now();
        }
    }
    info!("{}", scheduler.progress_string());

    let pixels = assemble(&scheduler, canvas, iterations);
    write_image(&value(OUTPUT), &pixels, canvas).map_err(|e| e.to_string())
}

fn main() {
    pretty_env_logger::init();
    let matches = args();
    if let Err(e) = render(&matches) {
        eprintln!("Render failure: {}", e);
        std::process::exit(1);
    }
}
