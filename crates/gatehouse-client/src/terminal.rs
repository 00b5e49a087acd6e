//! Terminal renditions of the device facilities and of server records.

use std::{
  io::{self, Write},
  time::Duration,
};

use gatehouse_client::{escalation::{AlertSignal, IncidentNavigator}, sos::LocalNotifier};
use gatehouse_core::{
  alert::{AlertEvent, AlertId},
  subject::{StaffMember, Subject},
  visit::{CheckOutReceipt, Visit},
};

/// Rings the terminal bell on each pulse.
pub struct TerminalSignal;

impl AlertSignal for TerminalSignal {
  fn raise(&self, alert: &AlertEvent) {
    println!();
    println!("!!! {} #{} !!!", alert.title, alert.id);
    println!("    {}", alert.description);
    if let Some(location) = &alert.location {
      println!("    at {location}");
    }
    println!("    type {} and press Enter to acknowledge", alert.id);
  }

  fn pulse(&self, _alert_id: AlertId, _duration: Duration) {
    print!("\x07");
    io::stdout().flush().ok();
  }

  fn clear(&self, alert_id: AlertId) { println!("[alert {alert_id}] escalation stopped"); }
}

/// Prints the incident review after an acknowledgement.
pub struct TerminalNavigator;

impl IncidentNavigator for TerminalNavigator {
  fn open_incident(&self, alert: &AlertEvent) {
    println!("── Incident #{} ──", alert.id);
    println!("  status:   {}", alert.status);
    println!("  priority: {}", alert.priority);
    if let Some(name) = &alert.reporter_name {
      println!("  reporter: {name}");
    }
    println!("  location: {}", alert.location.as_deref().unwrap_or("unknown"));
    println!("  raised:   {}", alert.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  {}", alert.description);
  }
}

/// Local confirmation on stderr.
pub struct TerminalNotifier;

impl LocalNotifier for TerminalNotifier {
  fn notify(&self, title: &str, body: &str) {
    eprintln!("{title}");
    eprintln!("{body}");
  }
}

// ─── Records ──────────────────────────────────────────────────────────────────

pub fn print_subject(subject: &Subject) {
  match subject {
    Subject::Visitor(visit) => print_visit(visit),
    Subject::Staff(staff) => print_staff(staff),
    Subject::Resident(r) => {
      println!("resident #{} {} ({})", r.id, r.full_name, r.role);
      if let Some(address) = &r.house_address {
        println!("  {address}");
      }
    }
  }
}

pub fn print_visit(visit: &Visit) {
  match &visit.visitor {
    Some(pass) => println!(
      "visit #{} {} [{}] {} host #{}",
      visit.id, pass.full_name, pass.visitor_type, visit.status, pass.host_id
    ),
    None => println!("shift #{} staff #{} {}", visit.id, visit.subject_id, visit.status),
  }
  if let Some(until) = visit.valid_until {
    println!("  valid until {}", until.format("%Y-%m-%d %H:%M UTC"));
  }
  if let Some(items) = &visit.items_carried_in {
    println!("  items in:  {items}");
  }
  if let Some(items) = &visit.items_carried_out {
    println!("  items out: {items}");
  }
}

pub fn print_staff(staff: &StaffMember) {
  println!(
    "staff #{} {} [{}] {}",
    staff.id, staff.full_name, staff.staff_type, staff.status
  );
}

pub fn print_receipt(receipt: &CheckOutReceipt) {
  print_visit(&receipt.visit);
  let review = &receipt.items;
  match review.matches {
    None => {}
    Some(true) => println!("  items match the host's list"),
    Some(false) => println!(
      "  CHECK ITEMS: host allowed {:?}, leaving with {:?}",
      review.allowed_items_out.as_deref().unwrap_or(""),
      review.items_carried_out.as_deref().unwrap_or("")
    ),
  }
}
