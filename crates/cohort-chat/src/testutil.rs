use cohort_shared::{GroupId, UserId};
use cohort_store::{Database, Group};

pub struct Fixture {
    pub db: Database,
    pub admin: UserId,
    pub group: GroupId,
    pub announcement: GroupId,
}

/// A community run by `admin` with one discussion group, plus known users
/// `bob` and `carol` who belong to neither.
pub fn fixture() -> Fixture {
    let mut db = Database::open_in_memory().unwrap();
    let admin = UserId::new("admin");
    db.upsert_user(&admin, "Admin").unwrap();
    db.upsert_user(&UserId::new("bob"), "Bob").unwrap();
    db.upsert_user(&UserId::new("carol"), "Carol").unwrap();

    let (_, announcement) = db.create_community(&admin, "School", "").unwrap();
    let group = Group::new("General", "", &admin);
    db.insert_group(&group).unwrap();

    Fixture {
        db,
        admin,
        group: group.id,
        announcement: announcement.id,
    }
}
