//! Jobs (running jobs, longest first)
//! Stats (counts by server, queue and job)
//! Warnings (failed queues, long running jobs)

use std::{
  env,
  error::Error,
  io,
  sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
  },
  thread,
  time::{Duration, Instant},
};

use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode},
  execute,
  terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use serde::Deserialize;
use tokio::runtime::Runtime;
use tui::{
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table, Tabs},
  Terminal,
};

use inflight::{RunningJob, StatsResult};

#[derive(Debug, Default, Deserialize)]
struct Listing {
  server: String,
  total_count: usize,
  jobs: Vec<RunningJob>,
  warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StatsEnvelope {
  stats: StatsResult,
}

struct Snapshot {
  listing: Listing,
  stats: StatsResult,
  fetched_at: String,
}

#[derive(Clone, Copy)]
enum DashboardTab {
  Jobs,
  Stats,
  Warnings,
}

struct App {
  current_tab: DashboardTab,
  snapshot: Option<Snapshot>,
  error: Option<String>,
  long_running_threshold: i64,
}

impl App {
  fn new(long_running_threshold: i64) -> Self {
    Self {
      current_tab: DashboardTab::Jobs,
      snapshot: None,
      error: None,
      long_running_threshold,
    }
  }

  fn next_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Jobs => DashboardTab::Stats,
      DashboardTab::Stats => DashboardTab::Warnings,
      DashboardTab::Warnings => DashboardTab::Jobs,
    }
  }

  fn previous_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Jobs => DashboardTab::Warnings,
      DashboardTab::Stats => DashboardTab::Jobs,
      DashboardTab::Warnings => DashboardTab::Stats,
    }
  }
}

async fn fetch_snapshot(client: &reqwest::Client, api_url: &str, show_all: bool) -> Result<Snapshot, reqwest::Error> {
  let listing: Listing = client
    .get(format!("{}/running-jobs", api_url))
    .query(&[("all", show_all)])
    .send()
    .await?
    .error_for_status()?
    .json()
    .await?;

  let stats: StatsEnvelope = client
    .get(format!("{}/running-jobs/stats", api_url))
    .send()
    .await?
    .error_for_status()?
    .json()
    .await?;

  Ok(Snapshot {
    listing,
    stats: stats.stats,
    fetched_at: chrono::Local::now().format("%H:%M:%S").to_string(),
  })
}

fn main() -> Result<(), Box<dyn Error>> {
  let api_url = env::var("INFLIGHT_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".into());
  let refresh = Duration::from_secs(
    env::var("INFLIGHT_REFRESH_SECS")
      .ok()
      .and_then(|v| v.parse().ok())
      .unwrap_or(5),
  );
  let long_running_threshold = env::var("INFLIGHT_LONG_RUNNING_THRESHOLD")
    .ok()
    .and_then(|v| v.parse().ok())
    .unwrap_or(300);

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let show_all = Arc::new(AtomicBool::new(false));
  let refresh_now = Arc::new(AtomicBool::new(true));
  let (tx, rx) = mpsc::channel::<Result<Snapshot, String>>();

  {
    let show_all = show_all.clone();
    let refresh_now = refresh_now.clone();
    let rt_bg = Runtime::new()?;
    thread::spawn(move || {
      let client = reqwest::Client::new();
      let mut last_fetch: Option<Instant> = None;
      loop {
        let due = last_fetch.map_or(true, |t| t.elapsed() >= refresh);
        if due || refresh_now.swap(false, Ordering::SeqCst) {
          let snapshot = rt_bg
            .block_on(fetch_snapshot(&client, &api_url, show_all.load(Ordering::SeqCst)))
            .map_err(|e| e.to_string());
          if tx.send(snapshot).is_err() {
            break;
          }
          last_fetch = Some(Instant::now());
        }
        thread::sleep(Duration::from_millis(100));
      }
    });
  }

  let mut app = App::new(long_running_threshold);
  let tick_rate = Duration::from_millis(250);

  loop {
    if let Ok(update) = rx.try_recv() {
      match update {
        Ok(snapshot) => {
          app.snapshot = Some(snapshot);
          app.error = None;
        }
        Err(e) => app.error = Some(e),
      }
    }
    let all = show_all.load(Ordering::SeqCst);
    terminal.draw(|f| ui(f, &app, all))?;

    if event::poll(tick_rate)? {
      if let CEvent::Key(key) = event::read()? {
        match key.code {
          KeyCode::Char('q') => break,
          KeyCode::Char('a') => {
            show_all.fetch_xor(true, Ordering::SeqCst);
            refresh_now.store(true, Ordering::SeqCst);
          }
          KeyCode::Char('r') => refresh_now.store(true, Ordering::SeqCst),
          KeyCode::Right => app.next_tab(),
          KeyCode::Left => app.previous_tab(),
          _ => {}
        }
      }
    }
  }

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;
  Ok(())
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &App, show_all: bool) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([
      Constraint::Length(3),
      Constraint::Min(0),
      Constraint::Length(3),
    ].as_ref())
    .split(f.size());

  let tab_titles = vec!["Jobs", "Stats", "Warnings"];
  let tabs = Tabs::new(
    tab_titles
      .iter()
      .map(|t| Spans::from(Span::styled(*t, Style::default().fg(Color::Yellow))))
      .collect(),
  )
    .block(Block::default().borders(Borders::ALL).title("Running Jobs"))
    .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    .select(match app.current_tab {
      DashboardTab::Jobs => 0,
      DashboardTab::Stats => 1,
      DashboardTab::Warnings => 2,
    });
  f.render_widget(tabs, chunks[0]);

  match (&app.snapshot, app.current_tab) {
    (None, _) => {
      let text = app.error.clone().unwrap_or_else(|| "Loading...".into());
      f.render_widget(Paragraph::new(text).block(Block::default().borders(Borders::ALL)), chunks[1]);
    }
    (Some(snapshot), DashboardTab::Jobs) => render_jobs(f, snapshot, show_all, app.long_running_threshold, chunks[1]),
    (Some(snapshot), DashboardTab::Stats) => render_stats(f, &snapshot.stats, chunks[1]),
    (Some(snapshot), DashboardTab::Warnings) => render_warnings(f, &snapshot.listing.warnings, chunks[1]),
  }

  let status = match (&app.error, &app.snapshot) {
    (Some(e), _) => format!("Error: {}", e),
    (None, Some(s)) => format!("Updated {}", s.fetched_at),
    (None, None) => String::new(),
  };
  let footer = Paragraph::new(format!("←/→: Switch Tabs | a: All Servers | r: Refresh | q: Quit    {}", status))
    .style(Style::default().fg(Color::White))
    .block(Block::default().borders(Borders::ALL));
  f.render_widget(footer, chunks[2]);
}

fn render_jobs<B: Backend>(f: &mut tui::Frame<B>, snapshot: &Snapshot, show_all: bool, long_running: i64, area: Rect) {
  let listing = &snapshot.listing;
  let title = if show_all {
    format!("All Servers ({} running)", listing.total_count)
  } else {
    format!("{} ({} running)", listing.server, listing.total_count)
  };

  if listing.jobs.is_empty() {
    let empty = Paragraph::new("No jobs currently running")
      .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(empty, area);
    return;
  }

  let header = Row::new(vec!["Job", "Queue", "Server", "Duration", "Attempts"])
    .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));
  let rows: Vec<Row> = listing.jobs.iter().map(|job| {
    let style = if job.running_for_seconds > long_running { Style::default().fg(Color::Red) } else { Style::default() };
    Row::new(vec![
      Cell::from(job.job_kind.clone()),
      Cell::from(job.queue.clone()),
      Cell::from(job.server.clone()),
      Cell::from(job.running_for_formatted.clone()).style(style),
      Cell::from(job.attempts.to_string()),
    ])
  }).collect();

  let widths = [
    Constraint::Percentage(40),
    Constraint::Percentage(15),
    Constraint::Percentage(20),
    Constraint::Percentage(15),
    Constraint::Percentage(10),
  ];
  let table = Table::new(rows)
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(title))
    .widths(&widths);
  f.render_widget(table, area);
}

fn render_stats<B: Backend>(f: &mut tui::Frame<B>, stats: &StatsResult, area: Rect) {
  let chunks = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([
      Constraint::Percentage(33),
      Constraint::Percentage(33),
      Constraint::Percentage(34),
    ].as_ref())
    .split(area);

  let panels = [
    ("By Server", &stats.by_server),
    ("By Queue", &stats.by_queue),
    ("By Job", &stats.by_job_kind),
  ];
  for ((title, counts), chunk) in panels.into_iter().zip(chunks) {
    let mut rows: Vec<_> = counts.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let items: Vec<ListItem> = rows.into_iter().map(|(name, count)| {
      ListItem::new(Spans::from(vec![
        Span::styled(format!("{:>4} ", count), Style::default().fg(Color::Green)),
        Span::raw(name.clone()),
      ]))
    }).collect();
    let list = List::new(items)
      .block(Block::default().borders(Borders::ALL).title(format!("{} (total {})", title, stats.total_running)));
    f.render_widget(list, chunk);
  }
}

fn render_warnings<B: Backend>(f: &mut tui::Frame<B>, warnings: &[String], area: Rect) {
  let items: Vec<ListItem> = if warnings.is_empty() {
    vec![ListItem::new(Spans::from(Span::raw("No warnings")))]
  } else {
    warnings.iter().map(|w| {
      ListItem::new(Spans::from(Span::styled(w.clone(), Style::default().fg(Color::Red))))
    }).collect()
  };
  let list = List::new(items)
    .block(Block::default().borders(Borders::ALL).title("Warnings"));
  f.render_widget(list, area);
}
