use std::sync::Arc;
use vacancy_intake::mail::memory::{InMemoryMailbox, html_message};
use vacancy_intake::mail::MailPart;
use vacancy_intake::processor::UNKNOWN_APPLICANT;
use vacancy_intake::{AccountPoller, IngestSettings, Store, poll_all_accounts};

const SENDER: &str = "Somon.tj <noreply@somon.tj>";

const BACKEND_BODY: &str = r#"<html><body>
<p>Здравствуйте! На вашу вакансию откликнулся кандидат.</p>
<p>Текст сообщения: Кандидат не предоставил сопроводительного письма</p>
<p>Имя: Иван Петров</p>
<p>Email для контакта - ivan@example.com</p>
<p>Телефон для контакта - +992123456789</p>
</body></html>"#;

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<Store>,
    mailbox: Arc<InMemoryMailbox>,
    pollers: Vec<AccountPoller>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().join("data/vacancies.db")).unwrap());
    let mailbox = Arc::new(InMemoryMailbox::new());
    let settings = Arc::new(IngestSettings {
        downloads_dir: dir.path().join("downloads"),
        ..Default::default()
    });
    let pollers = vec![AccountPoller::new("hr-main", mailbox.clone(), store.clone(), settings)];
    Harness {
        _dir: dir,
        store,
        mailbox,
        pollers,
    }
}

#[tokio::test]
async fn test_vendor_notification_becomes_application() {
    let h = harness();
    h.mailbox.add_message(html_message(
        "18f2a",
        SENDER,
        "Отклик на вакансию - Backend Developer",
        BACKEND_BODY,
    ));

    let summary = poll_all_accounts(&h.pollers).await;
    assert_eq!(summary.parsed_count, 1);
    assert_eq!(summary.new_vacancy_titles, vec!["Backend Developer".to_string()]);
    assert!(summary.failed_accounts.is_empty());

    let app = h.store.find_application_by_message_id("18f2a").unwrap().unwrap();
    assert_eq!(app.name, "Иван Петров");
    assert_eq!(app.email.as_deref(), Some("ivan@example.com"));
    assert_eq!(app.phone.as_deref(), Some("+992123456789"));
    assert_eq!(app.message, None);
    assert!(!app.is_processed);

    let vacancies = h.store.list_vacancies().unwrap();
    assert_eq!(vacancies.len(), 1);
    assert_eq!(vacancies[0].title, "Backend Developer");
    assert_eq!(vacancies[0].account_id.as_deref(), Some("hr-main"));
    assert_eq!(app.vacancy_id, Some(vacancies[0].id));

    // A second applicant for the same vacancy creates no new vacancy.
    h.mailbox.add_message(html_message(
        "18f2b",
        SENDER,
        "Отклик на вакансию - Backend Developer",
        "<p>Имя: Анна Смирнова</p>",
    ));
    let summary = poll_all_accounts(&h.pollers).await;
    assert_eq!(summary.parsed_count, 1);
    assert!(summary.new_vacancy_titles.is_empty());

    let linked = h.store.list_applications(Some(vacancies[0].id)).unwrap();
    assert_eq!(linked.len(), 2);
    assert_eq!(h.store.list_vacancies().unwrap().len(), 1);
}

#[tokio::test]
async fn test_repeated_polls_are_idempotent() {
    let h = harness();
    h.mailbox.add_message(html_message("m1", SENDER, "Отклик на вакансию - QA", BACKEND_BODY));

    assert_eq!(poll_all_accounts(&h.pollers).await.parsed_count, 1);
    for _ in 0..3 {
        let summary = poll_all_accounts(&h.pollers).await;
        assert_eq!(summary.parsed_count, 0);
        assert!(summary.new_vacancy_titles.is_empty());
    }
    assert_eq!(h.store.counts().unwrap().applications, 1);
    assert_eq!(h.mailbox.get_calls(), 1);
}

#[tokio::test]
async fn test_soft_deleted_application_is_not_recreated() {
    let h = harness();
    h.mailbox.add_message(html_message("m1", SENDER, "Отклик на вакансию - QA", BACKEND_BODY));
    poll_all_accounts(&h.pollers).await;

    let app = h.store.find_application_by_message_id("m1").unwrap().unwrap();
    assert!(h.store.soft_delete(app.id).unwrap());
    assert!(h.store.list_applications(None).unwrap().is_empty());

    let summary = poll_all_accounts(&h.pollers).await;
    assert_eq!(summary.parsed_count, 0);
    let counts = h.store.counts().unwrap();
    assert_eq!(counts.applications, 1);
    assert_eq!(counts.deleted, 1);

    assert!(h.store.restore(app.id).unwrap());
    assert_eq!(h.store.list_applications(None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_foreign_mail_leaves_no_rows() {
    let h = harness();
    h.mailbox.add_message(html_message(
        "m1",
        "recruiter@competitor.tj",
        "Отклик на вакансию - QA",
        BACKEND_BODY,
    ));

    let summary = poll_all_accounts(&h.pollers).await;
    assert_eq!(summary.parsed_count, 0);
    let counts = h.store.counts().unwrap();
    assert_eq!(counts.applications, 0);
    assert_eq!(counts.vacancies, 0);
}

#[tokio::test]
async fn test_nameless_applicant_with_resume() {
    let h = harness();
    let mut msg = html_message("m1", SENDER, "Отклик на вакансию - Driver", "<p>Без подписи</p>");
    msg.payload.parts.push(MailPart {
        mime_type: Some("application/pdf".into()),
        filename: Some("resume.pdf".into()),
        attachment_id: Some("att-7".into()),
        ..Default::default()
    });
    h.mailbox.add_message(msg);
    h.mailbox.add_attachment("m1", "att-7", b"%PDF".to_vec());

    poll_all_accounts(&h.pollers).await;

    let app = h.store.find_application_by_message_id("m1").unwrap().unwrap();
    assert_eq!(app.name, UNKNOWN_APPLICANT);
    assert_eq!(app.attachment_filename.as_deref(), Some("resume.pdf"));
    let path = app.file_path.unwrap();
    assert!(path.ends_with("Unknown_resume.pdf"));
    assert_eq!(std::fs::read(path).unwrap(), b"%PDF");
    assert_eq!(
        app.file_url.as_deref(),
        Some("https://mail.google.com/mail/u/1?ui=2&ik=21f77b88b6&attid=att-7&permmsgid=msg-f:m1&view=att&zw&disp=inline")
    );
}

#[tokio::test]
async fn test_processed_flag_round_trip() {
    let h = harness();
    h.mailbox.add_message(html_message("m1", SENDER, "Отклик на вакансию - QA", BACKEND_BODY));
    poll_all_accounts(&h.pollers).await;

    let app = h.store.find_application_by_message_id("m1").unwrap().unwrap();
    assert!(h.store.set_processed(app.id, true).unwrap());
    assert_eq!(h.store.counts().unwrap().processed, 1);
    assert!(!h.store.set_processed(9999, true).unwrap());
}
